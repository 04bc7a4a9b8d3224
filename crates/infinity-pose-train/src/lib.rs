//! # Infinity Pose Training Infrastructure
//!
//! Keypoint accuracy (PCK on heatmap peaks) for 2D pose estimation models
//! that predict either the standard 17-joint skeleton or the extended
//! 53-joint skeleton with anatomical landmarks, plus the epoch loop that
//! drives a network over a dataset and reports running statistics.
//!
//! ## Architecture
//!
//! ```text
//! TrainingConfig ──► Trainer ──► Network / HeatmapLoss / Optimizer
//!       │               │
//!       │           DataLoader ──► PoseDataset (SyntheticPoseDataset | yours)
//!       │               │
//!       │        ScoringStrategy (SingleGroup | Partitioned)
//!       │               │
//!       │      metrics::accuracy / partition::accuracy_partitioned
//!       │               │
//!       │        heatmap::PeakExtractor
//!       │
//!       └──► report::MetricsSink (TracingSink | JsonLinesSink | NullSink)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use infinity_pose_train::config::TrainingConfig;
//! use infinity_pose_train::dataset::{PoseDataset, SyntheticConfig, SyntheticPoseDataset};
//! use infinity_pose_train::heatmap::ArgmaxPeakExtractor;
//! use infinity_pose_train::scoring::ScoringStrategy;
//! use ndarray::Array4;
//!
//! let config = TrainingConfig::default();
//! config.validate().expect("config is valid");
//!
//! let dataset = SyntheticPoseDataset::new(8, SyntheticConfig::default());
//! let sample = dataset.get(0).unwrap();
//! let target = sample.target.insert_axis(ndarray::Axis(0));
//!
//! let score = config
//!     .scoring_strategy()
//!     .score(target.view(), target.view(), &ArgmaxPeakExtractor, &config.accuracy_params())
//!     .unwrap();
//! println!("{} = {:.3}", score.groups[0].name, score.groups[0].accuracy.mean);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod heatmap;
pub mod meter;
pub mod metrics;
pub mod network;
pub mod partition;
pub mod report;
pub mod scoring;
pub mod trainer;

// Convenient re-exports at the crate root.
pub use config::TrainingConfig;
pub use dataset::{DataLoader, PoseDataset, PoseSample, SyntheticConfig, SyntheticPoseDataset};
pub use error::{ConfigError, DatasetError, EvalError, EvalResult, TrainError, TrainResult};
pub use heatmap::{ArgmaxPeakExtractor, PeakExtractor, Peaks};
pub use meter::RunningStat;
pub use metrics::{accuracy, compute_distances, AccuracyParams, DistanceMatrix, JointAccuracy};
pub use partition::{accuracy_partitioned, PartitionedAccuracy};
pub use scoring::{GroupNames, ScoringStrategy};
pub use trainer::Trainer;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
