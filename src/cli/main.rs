//! Retouch CLI Tool
//!
//! Command-line front end that runs detect and remove operations through the
//! orchestrator, draws a progress bar from its progress events and cancels
//! the running operation on Ctrl-C.

use super::config::CliConfigBuilder;
use crate::{
    error::ErrorKind,
    processor::{OperationRequest, ProcessingOrchestrator},
    services::{ImageIOService, ProgressEvent, ProgressReporter},
    tracing_config::{init_cli_tracing, spans},
    types::{MaskPolygon, OperationFailure, OperationId, OperationResult, Point},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Region detection and object removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "retouch")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Provider chain configuration (JSON); defaults to the user config file
    #[arg(long, global = true, value_name = "FILE")]
    pub providers: Option<PathBuf>,

    /// Tile edge length for local processing, in pixels
    #[arg(long, global = true)]
    pub tile_size: Option<u32>,

    /// Refuse to start when process memory is above this many megabytes
    #[arg(long, global = true)]
    pub hard_limit_mb: Option<f64>,

    /// Warn when process memory is above this many megabytes
    #[arg(long, global = true)]
    pub soft_limit_mb: Option<f64>,

    /// Retry backoff unit in milliseconds
    #[arg(long, global = true)]
    pub backoff_ms: Option<u64>,

    /// Skip remote providers and process locally
    #[arg(long, global = true)]
    pub offline: bool,

    /// Hide the progress bar
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Remove the area inside a polygon and fill it from its surroundings
    Remove {
        /// Input image
        input: PathBuf,

        /// Mask vertices as x,y pairs (at least three)
        #[arg(long, required = true, num_args = 3.., value_parser = parse_point)]
        mask: Vec<Point>,

        /// Output image; defaults to `<input>-retouched.png`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Detect the object under a point
    Detect {
        /// Input image
        input: PathBuf,

        /// Click point as x,y
        #[arg(long, value_parser = parse_point)]
        point: Point,

        /// Write detections as JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Remove { .. } => "remove",
            Self::Detect { .. } => "detect",
        }
    }

    fn input(&self) -> &Path {
        match self {
            Self::Remove { input, .. } | Self::Detect { input, .. } => input,
        }
    }
}

/// Parse an `x,y` pair
pub fn parse_point(value: &str) -> std::result::Result<Point, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", value))?;
    let x = x
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid x in '{}': {}", value, e))?;
    let y = y
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid y in '{}': {}", value, e))?;
    Ok(Point::new(x, y))
}

/// Progress reporter drawing an indicatif bar
struct ProgressBarReporter {
    bar: ProgressBar,
}

impl ProgressBarReporter {
    fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn report_progress(&self, event: ProgressEvent) {
        self.bar.set_position(u64::from(event.progress));
        match &event.memory_warning {
            Some(warning) => self.bar.set_message(format!("{} ({})", event.message, warning)),
            None => self.bar.set_message(event.message),
        }
    }

    fn report_completion(&self, _operation_id: OperationId, total_time_ms: u64) {
        self.bar
            .finish_with_message(format!("done in {:.2}s", total_time_ms as f64 / 1000.0));
    }

    fn report_error(&self, _stage: crate::services::ProgressStage, failure: &OperationFailure) {
        self.bar.abandon_with_message(failure.message.clone());
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;
    let session_id = uuid::Uuid::new_v4().to_string();
    let _session = spans::session(&session_id, cli.command.name()).entered();

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let orchestrator = ProcessingOrchestrator::new(config).context("Failed to start orchestrator")?;

    let pixels = {
        let _span = spans::file_io(cli.command.input(), "read").entered();
        ImageIOService::load_pixels(cli.command.input())
            .with_context(|| format!("Failed to load {}", cli.command.input().display()))?
    };
    info!(
        "Loaded {} ({}x{})",
        cli.command.input().display(),
        pixels.width(),
        pixels.height()
    );

    let request = match &cli.command {
        Command::Remove { mask, .. } => {
            let polygon = MaskPolygon::new(mask.clone()).context("Invalid mask")?;
            OperationRequest::remove(pixels, polygon)
        },
        Command::Detect { point, .. } => OperationRequest::detect(pixels, *point),
    };

    let reporter = Arc::new(ProgressBarReporter::new(!cli.no_progress));
    let submission = orchestrator.submit(request, reporter);

    let id = submission.id();
    let canceller = orchestrator.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling operation {}", id);
            canceller.cancel(id);
        }
    });

    let result = submission.wait().await;
    ctrl_c.abort();

    write_result(&cli.command, result)
}

fn write_result(command: &Command, result: OperationResult) -> Result<()> {
    if let Some(failure) = &result.failure {
        if failure.kind == ErrorKind::Cancelled {
            warn!("{}", failure.message);
        } else {
            error!("{} ({})", failure.message, failure.detail);
        }
        anyhow::bail!("{}: {}", failure.kind, failure.message);
    }

    let source = result
        .source
        .as_ref()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);
    info!("Finished in {}ms via {}", result.elapsed_ms, source);

    match command {
        Command::Remove { input, output, .. } => {
            let target = output.clone().unwrap_or_else(|| generate_output_path(input));
            let pixels = result
                .into_pixels()
                .context("Removal finished without an image")?;
            let _span = spans::file_io(&target, "write").entered();
            ImageIOService::save_pixels(&pixels, &target)
                .with_context(|| format!("Failed to save {}", target.display()))?;
            println!("{}", target.display());
        },
        Command::Detect { output, .. } => {
            let objects = result.detections().unwrap_or_default();
            if objects.is_empty() {
                info!("Nothing detected at the selected point");
            }
            let json = serde_json::to_string_pretty(objects)?;
            match output {
                Some(path) => std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    writeln!(stdout, "{}", json)?;
                },
            }
        },
    }
    Ok(())
}

/// `<dir>/<stem>-retouched.png`
fn generate_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{}-retouched.png", stem))
}
