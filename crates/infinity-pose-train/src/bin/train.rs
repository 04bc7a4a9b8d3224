//! `train` binary entry point for the Infinity pose training loop.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin train -- --config config.json --dry-run
//! cargo run --bin train -- --dry-run --dry-run-samples 128 --epochs 2
//! ```
//!
//! Only the synthetic pipeline is wired here; real datasets and networks are
//! supplied by embedding [`infinity_pose_train::Trainer`] in another binary.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use infinity_pose_train::config::TrainingConfig;
use infinity_pose_train::dataset::{PoseDataset, SyntheticConfig, SyntheticPoseDataset};
use infinity_pose_train::network::{JointsMseLoss, NoopOptimizer, PassthroughNetwork};
use infinity_pose_train::report::JsonLinesSink;
use infinity_pose_train::trainer::Trainer;

/// Command-line arguments for the training binary.
#[derive(Parser, Debug)]
#[command(
    name = "train",
    version,
    about = "Infinity pose keypoint training and accuracy pipeline",
    long_about = None
)]
struct Args {
    /// Path to the JSON configuration file.
    ///
    /// If not provided, the default `TrainingConfig` is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the output directory from the config.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Override the metric log directory from the config.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Override the number of epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Use the deterministic synthetic dataset and a passthrough network.
    ///
    /// This is intended for pipeline smoke-tests only.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Number of synthetic samples per split when `--dry-run` is active.
    #[arg(long, default_value_t = 64)]
    dry_run_samples: usize,

    /// Disable the flip test during validation.
    #[arg(long, default_value_t = false)]
    no_flip_test: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Infinity Pose Training Pipeline v{}", infinity_pose_train::VERSION);

    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match TrainingConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("No configuration file provided, using defaults");
            TrainingConfig::default()
        }
    };

    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    if args.no_flip_test {
        config.flip_test = false;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    info!("Configuration validated successfully");
    info!("  joints       : {}", config.num_joints);
    info!("  scoring      : {:?}", config.scoring_strategy());
    info!("  threshold    : {}", config.pck_threshold);
    info!("  batch size   : {}", config.batch_size);
    info!("  epochs       : {}", config.num_epochs);
    info!("  flip test    : {}", config.flip_test);

    let resolved_path = config.output_dir.join("config.json");
    if let Err(e) = config.to_json(&resolved_path) {
        error!("Failed to write resolved configuration: {e}");
        std::process::exit(1);
    }
    info!("Resolved configuration written to {}", resolved_path.display());

    if !args.dry_run {
        error!("No dataset or network is wired into this binary; rerun with --dry-run");
        std::process::exit(1);
    }

    info!("DRY RUN: synthetic dataset ({} samples per split)", args.dry_run_samples);
    let syn_cfg = SyntheticConfig {
        num_joints: config.num_joints,
        group_boundary: config.group_boundary,
        ..SyntheticConfig::default()
    };
    let train_set = SyntheticPoseDataset::new(args.dry_run_samples, syn_cfg.clone());
    let valid_set = SyntheticPoseDataset::new(args.dry_run_samples, syn_cfg);
    info!("Synthetic dataset: {} samples", train_set.len());

    let metrics_path = config.log_dir.join(format!("{}.jsonl", config.model_name));
    let sink = match JsonLinesSink::create(&metrics_path) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to open metric log: {e}");
            std::process::exit(1);
        }
    };
    info!("Writing metrics to {}", metrics_path.display());

    let mut trainer = match Trainer::new(config, Box::new(sink)) {
        Ok(trainer) => trainer,
        Err(e) => {
            error!("Failed to build trainer: {e}");
            std::process::exit(1);
        }
    };
    let mut network = PassthroughNetwork::new();
    let loss = JointsMseLoss::default();
    let mut optimizer = NoopOptimizer;

    match trainer.run(&train_set, &valid_set, &mut network, &loss, &mut optimizer) {
        Ok(result) => {
            info!(
                "Training complete: best perf {:.4} at epoch {} ({:.1}s)",
                result.best_perf, result.best_epoch, result.total_time_secs
            );
        }
        Err(e) => {
            error!("Training failed: {e}");
            std::process::exit(1);
        }
    }
}
