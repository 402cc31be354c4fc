//! The four-step capture state machine with write-through persistence.
//!
//! ```text
//!   front ──image──▶ back ──image──▶ ready ──submitted──▶ results
//!     ▲                ▲               │                     │
//!     └──── delete ────┴───── delete ──┘                     │
//!     └───────────────────────── reset ─────────────────────┘
//! ```
//!
//! All mutation goes through named transitions. Each transition computes the
//! next state on a copy, writes it through to the [`DurableStore`], and only
//! then commits it in memory: if the store refuses the write, neither the
//! store nor the in-memory state has changed.

use crate::error::DocScanError;
use crate::output::{ExtractionResult, InlineImage};
use crate::store::{DurableStore, StoreOp, BACK_IMAGE_KEY, CURRENT_STEP_KEY, FRONT_IMAGE_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One side of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSide {
    Front,
    Back,
}

impl fmt::Display for CaptureSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureSide::Front => "front",
            CaptureSide::Back => "back",
        })
    }
}

impl FromStr for CaptureSide {
    type Err = DocScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(CaptureSide::Front),
            "back" => Ok(CaptureSide::Back),
            other => Err(DocScanError::InvalidConfig(format!(
                "unknown side '{other}', expected 'front' or 'back'"
            ))),
        }
    }
}

/// Where the user is in the flow. Ordered: `Front < Back < Ready < Results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStep {
    Front,
    Back,
    Ready,
    Results,
}

impl CaptureStep {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureStep::Front => "front",
            CaptureStep::Back => "back",
            CaptureStep::Ready => "ready",
            CaptureStep::Results => "results",
        }
    }

    /// The furthest pre-results step the captured images justify.
    pub fn justified_by(front_present: bool, back_present: bool) -> CaptureStep {
        match (front_present, back_present) {
            (false, _) => CaptureStep::Front,
            (true, false) => CaptureStep::Back,
            (true, true) => CaptureStep::Ready,
        }
    }

    /// The slot an image produced in this step fills, if any.
    pub fn open_slot(self) -> Option<CaptureSide> {
        match self {
            CaptureStep::Front => Some(CaptureSide::Front),
            CaptureStep::Back => Some(CaptureSide::Back),
            CaptureStep::Ready | CaptureStep::Results => None,
        }
    }
}

impl fmt::Display for CaptureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureStep {
    type Err = DocScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(CaptureStep::Front),
            "back" => Ok(CaptureStep::Back),
            "ready" => Ok(CaptureStep::Ready),
            "results" => Ok(CaptureStep::Results),
            other => Err(DocScanError::Storage {
                detail: format!("unknown capture step '{other}'"),
            }),
        }
    }
}

/// Durable snapshot used to resume an interrupted session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedCaptureState {
    pub front_image: Option<InlineImage>,
    pub back_image: Option<InlineImage>,
    pub current_step: Option<CaptureStep>,
}

impl PersistedCaptureState {
    /// Read the snapshot. Unreadable entries are dropped with a warning
    /// rather than failing the whole restore.
    pub fn load(store: &dyn DurableStore) -> Result<Self, DocScanError> {
        let image = |key: &'static str| -> Result<Option<InlineImage>, DocScanError> {
            Ok(store.get(key)?.and_then(|raw| match InlineImage::parse(raw) {
                Ok(img) => Some(img),
                Err(e) => {
                    warn!("Ignoring stored {}: {}", key, e);
                    None
                }
            }))
        };
        let current_step = store
            .get(CURRENT_STEP_KEY)?
            .and_then(|raw| match raw.parse::<CaptureStep>() {
                Ok(step) => Some(step),
                Err(e) => {
                    warn!("Ignoring stored step: {}", e);
                    None
                }
            });
        Ok(Self {
            front_image: image(FRONT_IMAGE_KEY)?,
            back_image: image(BACK_IMAGE_KEY)?,
            current_step,
        })
    }

    /// Batch removing every key of the snapshot.
    pub const CLEAR: [StoreOp; 3] = [
        StoreOp::Remove(FRONT_IMAGE_KEY),
        StoreOp::Remove(BACK_IMAGE_KEY),
        StoreOp::Remove(CURRENT_STEP_KEY),
    ];
}

#[derive(Debug, Clone)]
struct MachineState {
    step: CaptureStep,
    front: Option<InlineImage>,
    back: Option<InlineImage>,
    results: Option<ExtractionResult>,
}

impl MachineState {
    fn fresh() -> Self {
        Self {
            step: CaptureStep::Front,
            front: None,
            back: None,
            results: None,
        }
    }

    fn slot_mut(&mut self, side: CaptureSide) -> &mut Option<InlineImage> {
        match side {
            CaptureSide::Front => &mut self.front,
            CaptureSide::Back => &mut self.back,
        }
    }
}

/// Owns the capture step and both images.
pub struct CaptureStateMachine {
    state: MachineState,
    store: Arc<dyn DurableStore>,
}

impl CaptureStateMachine {
    /// Resume from `store`.
    ///
    /// A stored `results` step is never resumed, and a stored step ahead of
    /// what the stored images justify is pulled back.
    pub fn restore(store: Arc<dyn DurableStore>) -> Result<Self, DocScanError> {
        let persisted = PersistedCaptureState::load(store.as_ref())?;
        let justified =
            CaptureStep::justified_by(persisted.front_image.is_some(), persisted.back_image.is_some());
        let step = match persisted.current_step {
            Some(CaptureStep::Results) | None => CaptureStep::Front,
            Some(step) if step > justified => {
                warn!("Stored step '{}' is ahead of stored images, resuming at '{}'", step, justified);
                justified
            }
            Some(step) => step,
        };
        if persisted.front_image.is_some() || persisted.back_image.is_some() {
            info!("Resumed capture at step '{}'", step);
        }
        Ok(Self {
            state: MachineState {
                step,
                front: persisted.front_image,
                back: persisted.back_image,
                results: None,
            },
            store,
        })
    }

    pub fn step(&self) -> CaptureStep {
        self.state.step
    }

    pub fn image(&self, side: CaptureSide) -> Option<&InlineImage> {
        match side {
            CaptureSide::Front => self.state.front.as_ref(),
            CaptureSide::Back => self.state.back.as_ref(),
        }
    }

    pub fn front_image(&self) -> Option<&InlineImage> {
        self.state.front.as_ref()
    }

    pub fn back_image(&self) -> Option<&InlineImage> {
        self.state.back.as_ref()
    }

    pub fn results(&self) -> Option<&ExtractionResult> {
        self.state.results.as_ref()
    }

    /// Both images, when both are present.
    pub fn image_pair(&self) -> Option<(&InlineImage, &InlineImage)> {
        Some((self.state.front.as_ref()?, self.state.back.as_ref()?))
    }

    /// The first side without an image, front first.
    pub fn missing_side(&self) -> Option<CaptureSide> {
        if self.state.front.is_none() {
            Some(CaptureSide::Front)
        } else if self.state.back.is_none() {
            Some(CaptureSide::Back)
        } else {
            None
        }
    }

    /// A transcoded image was produced: fill the open slot and advance.
    pub fn record_image(&mut self, image: InlineImage) -> Result<CaptureSide, DocScanError> {
        let side = self
            .state
            .step
            .open_slot()
            .ok_or(DocScanError::NoOpenSlot {
                step: self.state.step,
            })?;
        let mut next = self.state.clone();
        *next.slot_mut(side) = Some(image.clone());
        next.step = match side {
            CaptureSide::Front => CaptureStep::Back,
            CaptureSide::Back => CaptureStep::Ready,
        };
        let ops = vec![
            StoreOp::Set(image_key(side), image.into()),
            StoreOp::Set(CURRENT_STEP_KEY, next.step.as_str().to_string()),
        ];
        self.commit(next, &ops)?;
        Ok(side)
    }

    /// Remove one image and re-derive the step conservatively.
    ///
    /// In `results` the step is left alone: the images still back the
    /// print view.
    pub fn delete_image(&mut self, side: CaptureSide) -> Result<CaptureStep, DocScanError> {
        let mut next = self.state.clone();
        *next.slot_mut(side) = None;
        let mut ops = vec![StoreOp::Remove(image_key(side))];
        if next.step != CaptureStep::Results {
            next.step = match side {
                CaptureSide::Front => CaptureStep::Front,
                CaptureSide::Back if next.front.is_some() => CaptureStep::Back,
                CaptureSide::Back => CaptureStep::Front,
            };
            ops.push(StoreOp::Set(CURRENT_STEP_KEY, next.step.as_str().to_string()));
        }
        self.commit(next, &ops)?;
        Ok(self.state.step)
    }

    /// A submission succeeded: enter `results` and drop the durable record.
    pub fn complete_submission(&mut self, results: ExtractionResult) -> Result<(), DocScanError> {
        if self.state.step == CaptureStep::Results {
            return Err(DocScanError::AlreadySubmitted);
        }
        if let Some(side) = self.missing_side() {
            return Err(DocScanError::MissingImage { side });
        }
        let mut next = self.state.clone();
        next.step = CaptureStep::Results;
        next.results = Some(results);
        self.commit(next, &PersistedCaptureState::CLEAR)
    }

    /// Discard everything and return to `front`.
    pub fn reset(&mut self) -> Result<(), DocScanError> {
        self.commit(MachineState::fresh(), &PersistedCaptureState::CLEAR)
    }

    /// Write `ops` through, then adopt `next`.
    fn commit(&mut self, next: MachineState, ops: &[StoreOp]) -> Result<(), DocScanError> {
        self.store.apply(ops)?;
        if next.step != self.state.step {
            debug!("Capture step {} → {}", self.state.step, next.step);
        }
        self.state = next;
        Ok(())
    }
}

fn image_key(side: CaptureSide) -> &'static str {
    match side {
        CaptureSide::Front => FRONT_IMAGE_KEY,
        CaptureSide::Back => BACK_IMAGE_KEY,
    }
}

impl fmt::Debug for CaptureStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStateMachine")
            .field("step", &self.state.step)
            .field("front", &self.state.front)
            .field("back", &self.state.back)
            .field("results", &self.state.results.as_ref().map(|r| r.len()))
            .finish()
    }
}
