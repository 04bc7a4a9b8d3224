//! Training and evaluation configuration.
//!
//! [`TrainingConfig`] is the single source of truth for the joint layout,
//! accuracy constants, loop cadence and validation switches. It is
//! serializable via [`serde`] so runs can be described in JSON files.
//!
//! # Example
//!
//! ```rust
//! use infinity_pose_train::config::TrainingConfig;
//!
//! let cfg = TrainingConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.num_joints, 17);
//! assert_eq!(cfg.group_boundary, 17);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::metrics::AccuracyParams;
use crate::scoring::{GroupNames, ScoringStrategy};

// ---------------------------------------------------------------------------
// TrainingConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a training / validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // -----------------------------------------------------------------------
    // Skeleton
    // -----------------------------------------------------------------------
    /// Number of heatmap channels the model predicts. Default: **17**.
    pub num_joints: usize,

    /// Joint count of the extended (standard + anatomical) skeleton. A model
    /// with exactly this many joints is scored per group. Default: **53**.
    pub extended_num_joints: usize,

    /// First anatomical joint index; joints below it form the standard
    /// skeleton. Default: **17**.
    pub group_boundary: usize,

    /// Report names of the three partitioned groups.
    pub group_names: GroupNames,

    // -----------------------------------------------------------------------
    // Accuracy
    // -----------------------------------------------------------------------
    /// Normalised distance below which a joint counts as correct. Default: **0.5**.
    pub pck_threshold: f64,

    /// Divisor applied to the heatmap size to obtain the normaliser.
    /// Default: **10.0**.
    pub normalization_divisor: f64,

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------
    /// Emit a progress report every N batches. Default: **100**.
    pub print_freq: usize,

    /// Mini-batch size. Default: **32**.
    pub batch_size: usize,

    /// Number of epochs driven by [`crate::trainer::Trainer::run`]. Default: **140**.
    pub num_epochs: usize,

    /// Shuffle the training set each epoch. Default: **true**.
    pub shuffle: bool,

    /// Seed for the deterministic shuffle. Default: **42**.
    pub seed: u64,

    /// Layers the network should freeze before training.
    pub frozen_layers: Vec<String>,

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------
    /// Average predictions with a horizontally flipped forward pass.
    /// Default: **true**.
    pub flip_test: bool,

    /// Shift the flipped heatmaps one pixel to the right before averaging.
    /// Default: **true**.
    pub shift_heatmap: bool,

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------
    /// Architecture name printed in the final results table.
    pub model_name: String,

    /// Directory for run artefacts.
    pub output_dir: PathBuf,

    /// Directory where metric records are written.
    pub log_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            num_joints: 17,
            extended_num_joints: 53,
            group_boundary: 17,
            group_names: GroupNames::default(),
            pck_threshold: 0.5,
            normalization_divisor: 10.0,
            print_freq: 100,
            batch_size: 32,
            num_epochs: 140,
            shuffle: true,
            seed: 42,
            frozen_layers: Vec::new(),
            flip_test: true,
            shift_heatmap: true,
            model_name: "pose_hrnet".to_string(),
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("log"),
        }
    }
}

impl TrainingConfig {
    /// Load a [`TrainingConfig`] from a JSON file at `path` and validate it.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::ParseError`] if the JSON is malformed and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: TrainingConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Returns `true` when the model predicts the full extended skeleton.
    pub fn is_extended(&self) -> bool {
        self.num_joints == self.extended_num_joints
    }

    /// Threshold and normaliser used by the accuracy engine.
    pub fn accuracy_params(&self) -> AccuracyParams {
        AccuracyParams {
            threshold: self.pck_threshold,
            normalization_divisor: self.normalization_divisor,
        }
    }

    /// Resolve the scoring strategy for this run.
    ///
    /// Called once when the trainer is built; the choice is not re-checked
    /// per batch.
    pub fn scoring_strategy(&self) -> ScoringStrategy {
        if self.is_extended() {
            ScoringStrategy::Partitioned {
                boundary: self.group_boundary,
                names: self.group_names.clone(),
            }
        } else {
            ScoringStrategy::SingleGroup
        }
    }

    /// Validate all fields and return an error describing the first problem
    /// found.
    ///
    /// # Validated invariants
    ///
    /// - `num_joints`, `batch_size`, `num_epochs` and `print_freq` are non-zero.
    /// - `pck_threshold` and `normalization_divisor` are finite and positive.
    /// - `group_boundary` lies strictly inside `(0, extended_num_joints)`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_joints == 0 {
            return Err(ConfigError::invalid_value("num_joints", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.num_epochs == 0 {
            return Err(ConfigError::invalid_value("num_epochs", "must be > 0"));
        }
        if self.print_freq == 0 {
            return Err(ConfigError::invalid_value("print_freq", "must be > 0"));
        }

        if !(self.pck_threshold.is_finite() && self.pck_threshold > 0.0) {
            return Err(ConfigError::invalid_value(
                "pck_threshold",
                "must be finite and > 0.0",
            ));
        }
        if !(self.normalization_divisor.is_finite() && self.normalization_divisor > 0.0) {
            return Err(ConfigError::invalid_value(
                "normalization_divisor",
                "must be finite and > 0.0",
            ));
        }

        if self.group_boundary == 0 || self.group_boundary >= self.extended_num_joints {
            return Err(ConfigError::invalid_value(
                "group_boundary",
                format!("must be in (0, {})", self.extended_num_joints),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
