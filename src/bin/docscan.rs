//! CLI binary for edgequake-docscan.
//!
//! A thin shim over the library crate: every invocation resumes the capture
//! state from a JSON file, performs one action, and writes the state back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_docscan::present::{self, ClipboardSink, PrintJob, PrintSink};
use edgequake_docscan::{
    CaptureConfig, CaptureFlow, CaptureObserver, CaptureSide, CaptureStateMachine, CaptureStep,
    DocScanError, DurableStore, ExtractionResult, FileStore, FlowStatus, Notification,
    SessionStatus, StillCamera,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Terminal observer ────────────────────────────────────────────────────────

/// Renders flow events on stderr: a spinner while work is in flight,
/// notifications and step changes as log lines.
struct CliObserver {
    quiet: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl CliObserver {
    fn new(quiet: bool) -> Arc<Self> {
        Arc::new(Self {
            quiet,
            spinner: Mutex::new(None),
        })
    }

    fn start_spinner(&self, label: &str) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(old) = slot.replace(bar) {
                old.finish_and_clear();
            }
        }
    }

    fn stop_spinner(&self) {
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }
    }
}

impl CaptureObserver for CliObserver {
    fn on_status(&self, status: FlowStatus) {
        if self.quiet {
            return;
        }
        match status {
            FlowStatus::ProcessingImage | FlowStatus::Submitting => {
                self.start_spinner(status.label())
            }
            FlowStatus::Ready | FlowStatus::Success | FlowStatus::Error => self.stop_spinner(),
        }
    }

    fn on_notification(&self, notification: &Notification) {
        if !self.quiet {
            eprintln!("{} {}", cyan("◆"), bold(&notification.message));
        }
    }

    fn on_step_changed(&self, from: CaptureStep, to: CaptureStep) {
        if !self.quiet {
            eprintln!("  {}", dim(&format!("step {from} → {to}")));
        }
    }

    fn on_camera_status(&self, status: SessionStatus, message: Option<&str>) {
        if self.quiet {
            return;
        }
        match (status, message) {
            (SessionStatus::Error, Some(msg)) => eprintln!("  {} {}", red("✗"), msg),
            (status, _) => eprintln!("  {}", dim(&format!("camera {status}"))),
        }
    }
}

// ── Sinks ────────────────────────────────────────────────────────────────────

/// The terminal has no clipboard; copied text goes to stdout.
struct StdoutClipboard;

impl ClipboardSink for StdoutClipboard {
    fn write_text(&self, text: &str) -> Result<(), DocScanError> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| DocScanError::Sink {
                target: "stdout",
                detail: e.to_string(),
            })
    }
}

/// "Prints" by writing the images and the result into a directory.
struct DirectoryPrinter {
    dir: PathBuf,
}

impl PrintSink for DirectoryPrinter {
    fn print(&self, job: &PrintJob) -> Result<(), DocScanError> {
        let sink_err = |e: &dyn std::fmt::Display| DocScanError::Sink {
            target: "print directory",
            detail: format!("{}: {}", self.dir.display(), e),
        };
        std::fs::create_dir_all(&self.dir).map_err(|e| sink_err(&e))?;
        for (name, image) in job.images() {
            let ext = match image.mime_type() {
                "image/png" => "png",
                _ => "jpg",
            };
            let bytes = image.decode_bytes()?;
            std::fs::write(self.dir.join(format!("{name}.{ext}")), bytes)
                .map_err(|e| sink_err(&e))?;
        }
        if let Some(ref result) = job.result {
            std::fs::write(self.dir.join("result.txt"), present::copy_all_text(result))
                .map_err(|e| sink_err(&e))?;
        }
        Ok(())
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Point at the extraction service once
  export DOCSCAN_ENDPOINT=https://extract.example.com/passport

  # Add the front, then the back (files are downscaled to 1200 px JPEG)
  docscan upload front.jpg
  docscan upload back.png

  # Or drive the live-capture path with a still frame
  docscan capture --frame back.png

  # Where am I?
  docscan status

  # Submit both sides and print the extracted fields
  docscan submit
  docscan submit --json > fields.json
  docscan submit --copy | pbcopy
  docscan submit --export out/

  # Start over
  docscan reset

STATE:
  Progress is kept in --state (default .docscan/state.json). It survives
  crashes and restarts and is cleared after a successful submission.

ENVIRONMENT VARIABLES:
  DOCSCAN_ENDPOINT        Extraction endpoint URL (upload, capture, submit)
  DOCSCAN_STATE           State file path
  DOCSCAN_TIMEOUT         Submission timeout in seconds
  RUST_LOG                Override log filter (e.g. edgequake_docscan=debug)
"#;

/// Capture both sides of a passport and submit them for field extraction.
#[derive(Parser, Debug)]
#[command(
    name = "docscan",
    version,
    about = "Capture both sides of a passport and submit them for field extraction",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Capture state file.
    #[arg(long, global = true, env = "DOCSCAN_STATE", default_value = ".docscan/state.json")]
    state: PathBuf,

    /// Extraction endpoint URL.
    #[arg(long, global = true, env = "DOCSCAN_ENDPOINT")]
    endpoint: Option<String>,

    /// Longest edge of stored images, in pixels.
    #[arg(long, global = true, env = "DOCSCAN_MAX_DIMENSION", default_value_t = 1200)]
    max_dimension: u32,

    /// JPEG quality for uploaded files (1–100).
    #[arg(long, global = true, env = "DOCSCAN_UPLOAD_QUALITY", default_value_t = 70,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    upload_quality: u8,

    /// JPEG quality for camera captures (1–100).
    #[arg(long, global = true, env = "DOCSCAN_CAPTURE_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    capture_quality: u8,

    /// Submission timeout in seconds. Default: none.
    #[arg(long, global = true, env = "DOCSCAN_TIMEOUT")]
    timeout: Option<u64>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "DOCSCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current step and captured images.
    Status {
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Add an image file to the open slot.
    Upload {
        /// Image file (any format the decoder understands).
        file: PathBuf,
    },
    /// Capture through the live-camera path using a still frame.
    Capture {
        /// Image served as the camera's only frame.
        #[arg(long)]
        frame: PathBuf,
    },
    /// Delete the front or back image.
    Delete {
        #[arg(value_enum)]
        side: SideArg,
    },
    /// Submit both images and print the extracted fields.
    Submit {
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
        /// Print `label: value` lines, ready to paste.
        #[arg(long, conflicts_with = "json")]
        copy: bool,
        /// Also write the images and result into this directory.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Discard both images and start over.
    Reset,
    /// Write the captured images into a directory.
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SideArg {
    Front,
    Back,
}

impl From<SideArg> for CaptureSide {
    fn from(v: SideArg) -> Self {
        match v {
            SideArg::Front => CaptureSide::Front,
            SideArg::Back => CaptureSide::Back,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store: Arc<dyn DurableStore> = Arc::new(
        FileStore::open(&cli.state)
            .with_context(|| format!("Failed to open state file {:?}", cli.state))?,
    );

    match cli.command {
        Command::Status { json } => {
            let machine = CaptureStateMachine::restore(store)?;
            print_status(&machine, json)?;
        }
        Command::Upload { ref file } => {
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let flow = build_flow(&cli, store)?;
            let side = flow.process_upload(bytes).await.context("Upload failed")?;
            report_captured(&cli, side, flow.step());
        }
        Command::Capture { ref frame } => {
            let bytes = tokio::fs::read(frame)
                .await
                .with_context(|| format!("Failed to read {:?}", frame))?;
            let camera = StillCamera::from_bytes(&bytes).context("Frame is not an image")?;
            let flow = build_flow(&cli, store)?.with_camera(Arc::new(camera));
            let session = flow.open_camera().await?;
            if session.status() != SessionStatus::Active {
                flow.close_camera(&session);
                anyhow::bail!(
                    "{}",
                    session
                        .error_message()
                        .unwrap_or_else(|| "Camera did not start".to_string())
                );
            }
            let side = flow.capture(&session).await.context("Capture failed")?;
            report_captured(&cli, side, flow.step());
        }
        Command::Delete { side } => {
            let mut machine = CaptureStateMachine::restore(store)?;
            let side = CaptureSide::from(side);
            let step = machine.delete_image(side)?;
            if !cli.quiet {
                eprintln!("{} Deleted {} image  →  step {}", green("✔"), side, bold(step.as_str()));
            }
        }
        Command::Submit {
            json,
            copy,
            ref export,
        } => {
            let flow = build_flow(&cli, store)?;
            let result = flow.submit().await.context("Submission failed")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?
                );
            } else if copy {
                flow.copy_all(&StdoutClipboard)?;
            } else {
                print_result(&result);
            }
            if let Some(dir) = export {
                flow.print(&DirectoryPrinter { dir: dir.clone() })?;
                if !cli.quiet {
                    eprintln!("{} Exported to {}", green("✔"), bold(&dir.display().to_string()));
                }
            }
        }
        Command::Reset => {
            let mut machine = CaptureStateMachine::restore(store)?;
            machine.reset()?;
            if !cli.quiet {
                eprintln!("{} Cleared, step {}", green("✔"), bold("front"));
            }
        }
        Command::Export { ref out } => {
            let machine = CaptureStateMachine::restore(store)?;
            let job = PrintJob {
                front: machine.front_image().cloned(),
                back: machine.back_image().cloned(),
                result: None,
            };
            if job.is_empty() {
                anyhow::bail!("Nothing captured yet");
            }
            DirectoryPrinter { dir: out.clone() }.print(&job)?;
            if !cli.quiet {
                eprintln!("{} Exported to {}", green("✔"), bold(&out.display().to_string()));
            }
        }
    }

    Ok(())
}

/// Map CLI args to a `CaptureFlow` with the terminal observer attached.
fn build_flow(cli: &Cli, store: Arc<dyn DurableStore>) -> Result<CaptureFlow> {
    let endpoint = cli
        .endpoint
        .as_deref()
        .context("An extraction endpoint is required: pass --endpoint or set DOCSCAN_ENDPOINT")?;

    let mut builder = CaptureConfig::builder()
        .endpoint(endpoint)
        .max_dimension(cli.max_dimension)
        .upload_quality(cli.upload_quality)
        .capture_quality(cli.capture_quality);
    if let Some(secs) = cli.timeout {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    let config = builder.build().context("Invalid configuration")?;

    let flow = CaptureFlow::new(config, store)?.with_observer(CliObserver::new(cli.quiet));
    Ok(flow)
}

fn report_captured(cli: &Cli, side: CaptureSide, step: CaptureStep) {
    if cli.quiet {
        return;
    }
    let next = match step {
        CaptureStep::Back => "add the back side next",
        CaptureStep::Ready => "ready to submit",
        _ => "",
    };
    eprintln!("{} Stored {} image  {}", green("✔"), bold(&side.to_string()), dim(next));
}

fn print_status(machine: &CaptureStateMachine, json: bool) -> Result<()> {
    if json {
        let snapshot = serde_json::json!({
            "step": machine.step(),
            "front_image": machine.front_image().map(|i| i.len()),
            "back_image": machine.back_image().map(|i| i.len()),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialise status")?
        );
        return Ok(());
    }
    println!("Step:         {}", machine.step());
    for side in [CaptureSide::Front, CaptureSide::Back] {
        let line = match machine.image(side) {
            Some(image) => green(&format!("✓ {} ({} bytes)", image.mime_type(), image.len())),
            None => dim("—"),
        };
        println!("{:<13} {}", format!("{}:", capitalise(side)), line);
    }
    Ok(())
}

fn print_result(result: &ExtractionResult) {
    if result.is_empty() {
        println!("{}", dim("(no fields returned)"));
        return;
    }
    let rows = present::rows(result);
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    // Bold adds 8 bytes of escape codes.
    for (label, value) in rows {
        println!("{:<width$}  {}", bold(&label), value, width = width + 8);
    }
}

fn capitalise(side: CaptureSide) -> &'static str {
    match side {
        CaptureSide::Front => "Front",
        CaptureSide::Back => "Back",
    }
}
