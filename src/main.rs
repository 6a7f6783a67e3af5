//! Meterscan - meter reading extraction from uploaded photos
//!
//! Decodes an uploaded meter photo, recognizes the digits on the display,
//! and prints the assembled reading. Recognition runs through one of two
//! strategies: a per-digit object detector or a whole-line OCR pass over a
//! binarized frame.

mod config;
mod storage;
mod vision;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::AppConfig;
use crate::storage::artifacts::FileArtifactSink;
use crate::storage::logs::{AccessLog, ReadingLog};
use crate::vision::{
    DetectorConfig, DigitDetectorStrategy, LineOcrStrategy, ModelManager, Pipeline, PipelineError,
    RecognitionStrategy, StrategyKind,
};

/// Meterscan - meter reading extraction
#[derive(Parser, Debug)]
#[command(name = "meterscan")]
#[command(about = "Extract the numeric reading from a meter photo")]
struct Args {
    /// Image file to process (the raw upload body)
    image: Option<PathBuf>,

    /// Recognition strategy: "detection" or "ocr" (overrides config)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Confidence threshold for the detection strategy (overrides config)
    #[arg(short = 't', long)]
    threshold: Option<f32>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Models directory (overrides config)
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Source identifier recorded in the logs
    #[arg(long, default_value = "cli")]
    source: String,

    /// Skip the reading/access log rows for this run
    #[arg(long)]
    no_log: bool,

    /// Download all model artifacts and exit
    #[arg(long)]
    download_models: bool,

    /// Print the N most recent readings (newest first) and exit
    #[arg(long, value_name = "N")]
    history: Option<usize>,
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref());

    let data_dir = storage::get_data_dir()?;
    let log_dir = config.logging.dir.clone().unwrap_or_else(|| data_dir.clone());

    // History mode: show recent readings and exit
    if let Some(limit) = args.history {
        let log = ReadingLog::new(log_dir.join("readings.csv"));
        for record in log.recent(limit)? {
            println!(
                "{}  {:>12}  ({} digits)  {}",
                record.timestamp,
                if record.reading.is_empty() {
                    "<none>"
                } else {
                    record.reading.as_str()
                },
                record.digits,
                record.source
            );
        }
        return Ok(());
    }

    let models_dir = args
        .models_dir
        .clone()
        .or_else(|| config.models.dir.clone())
        .unwrap_or_else(|| data_dir.join("models"));
    let manager = ModelManager::with_dir(models_dir)?;

    // Download mode: fetch everything both strategies need and exit
    if args.download_models {
        manager.ensure_for(StrategyKind::Detection)?;
        manager.ensure_for(StrategyKind::Ocr)?;
        info!("All model artifacts ready under {:?}", manager.models_dir());
        return Ok(());
    }

    let Some(image_path) = args.image.clone() else {
        bail!("No image provided. Pass a file path, or --history N to list recent readings.");
    };

    let strategy_kind = match args.strategy.as_deref() {
        Some(s) => parse_strategy(s)?,
        None => config.pipeline.strategy,
    };

    info!("Meterscan starting with {:?} strategy", strategy_kind);

    // Model load failures are fatal here, before any upload is touched
    let pipeline = build_pipeline(&args, &config, &manager, strategy_kind, &data_dir)?;

    let bytes = std::fs::read(&image_path)
        .with_context(|| format!("Failed to read image file {:?}", image_path))?;

    match pipeline.process_upload(&bytes) {
        Ok(outcome) => {
            if outcome.reading.is_empty() {
                info!("No digits recognized in this frame");
            }
            println!("{}", outcome.reading);

            if config.logging.enabled && !args.no_log {
                let access = AccessLog::new(log_dir.join("access.csv"));
                access.append(outcome.width, outcome.height, bytes.len(), &args.source)?;

                let readings = ReadingLog::new(log_dir.join("readings.csv"));
                readings.append(&outcome.reading, &args.source)?;
            }

            Ok(())
        }
        Err(e) => {
            // Still record the attempt; a rejected upload is an access event
            if config.logging.enabled && !args.no_log {
                let access = AccessLog::new(log_dir.join("access.csv"));
                access.append(0, 0, bytes.len(), &args.source)?;
            }
            bail!("Upload rejected ({}): {}", e.kind(), e);
        }
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: Option<&std::path::Path>) -> AppConfig {
    if let Some(path) = path {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                tracing::warn!("Failed to load {:?} ({}), using defaults", path, e);
                return AppConfig::default();
            }
        }
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn parse_strategy(s: &str) -> Result<StrategyKind> {
    match s {
        "detection" | "detect" => Ok(StrategyKind::Detection),
        "ocr" => Ok(StrategyKind::Ocr),
        other => bail!("Unknown strategy '{}' (expected 'detection' or 'ocr')", other),
    }
}

/// Ensure model artifacts, load the requested strategy, and assemble the
/// pipeline with its debug sink.
fn build_pipeline(
    args: &Args,
    config: &AppConfig,
    manager: &ModelManager,
    strategy_kind: StrategyKind,
    data_dir: &std::path::Path,
) -> Result<Pipeline> {
    manager
        .ensure_for(strategy_kind)
        .map_err(PipelineError::ModelLoad)?;

    let strategy: Box<dyn RecognitionStrategy> = match strategy_kind {
        StrategyKind::Detection => {
            let detector_config = DetectorConfig {
                confidence_threshold: args
                    .threshold
                    .unwrap_or(config.pipeline.confidence_threshold),
                overlap_suppression: config.pipeline.overlap_suppression,
                overlap_iou: config.pipeline.overlap_iou,
                annotate: config.debug.save_artifacts,
            };
            Box::new(
                DigitDetectorStrategy::load(manager, detector_config)
                    .map_err(PipelineError::ModelLoad)?,
            )
        }
        StrategyKind::Ocr => {
            Box::new(LineOcrStrategy::load(manager).map_err(PipelineError::ModelLoad)?)
        }
    };

    let mut pipeline = Pipeline::new(strategy);

    if config.debug.save_artifacts {
        let artifact_dir = config
            .debug
            .dir
            .clone()
            .unwrap_or_else(|| data_dir.join("artifacts"));
        pipeline = pipeline.with_sink(Arc::new(FileArtifactSink::new(artifact_dir)?));
    }

    Ok(pipeline)
}
