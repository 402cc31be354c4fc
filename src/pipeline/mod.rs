//! Pipeline stages for the capture-and-submit flow.
//!
//! Each submodule implements exactly one step. None of them knows about the
//! capture step machine or durable storage; [`crate::flow`] wires them
//! together.
//!
//! ## Data Flow
//!
//! ```text
//! camera ──▶ transcode ──▶ (machine) ──▶ submit
//! (frame)    (JPEG ≤1200px)   (store)     (HTTP POST)
//!    ▲
//! file upload
//! ```
//!
//! 1. [`camera`]    — negotiate a live stream through ordered tiers and grab
//!    a frame; the only stage that talks to the host's media devices
//! 2. [`transcode`] — decode, cap the longer edge, re-encode as JPEG; runs in
//!    `spawn_blocking` because it is CPU-bound
//! 3. [`submit`]    — POST both sides to the extraction endpoint and
//!    normalise the answer; the only stage with network I/O

pub mod camera;
pub mod submit;
pub mod transcode;
