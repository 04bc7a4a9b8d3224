//! Error types for the Infinity pose training pipeline.
//!
//! Every module that can fail imports its error type from here rather than
//! defining it inline, keeping the hierarchy in one place.
//!
//! ## Hierarchy
//!
//! ```text
//! TrainError (top-level)
//! ├── ConfigError   (config validation / file loading)
//! ├── EvalError     (shape checks in the accuracy engine)
//! └── DatasetError  (sample access, batch assembly)
//! ```
//!
//! Missing ground truth and empty joint groups are **not** errors. They are
//! carried as `None` distances and `None` / zero accuracies so that a sparse
//! batch never aborts an epoch.

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Result aliases
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type TrainResult<T> = Result<T, TrainError>;

/// `Result` alias for the accuracy / distance engine.
pub type EvalResult<T> = Result<T, EvalError>;

// ---------------------------------------------------------------------------
// TrainError top-level aggregator
// ---------------------------------------------------------------------------

/// Top-level error type for the training and validation loop.
///
/// Errors from the network, the loss or the data pipeline terminate the
/// current batch loop; nothing is retried.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A fatal shape problem detected by the accuracy engine.
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// A dataset loading or batching error.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The network forward pass (or optimizer step) failed.
    #[error("Network failure: {0}")]
    Network(String),

    /// A metric sink could not record a scalar batch.
    #[error("Metric sink failure: {0}")]
    Sink(String),

    /// The dataset is empty and no epoch can be run.
    #[error("Dataset is empty")]
    EmptyDataset,
}

impl TrainError {
    /// Construct a [`TrainError::Network`].
    pub fn network<S: Into<String>>(msg: S) -> Self {
        TrainError::Network(msg.into())
    }

    /// Construct a [`TrainError::Sink`].
    pub fn sink<S: Into<String>>(msg: S) -> Self {
        TrainError::Sink(msg.into())
    }
}

// ---------------------------------------------------------------------------
// EvalError
// ---------------------------------------------------------------------------

/// Fatal errors raised by the distance / accuracy engine.
///
/// These are checked before any distance is computed: silently broadcasting
/// mismatched arrays would corrupt the scores.
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    /// Two arrays that must agree on their leading axes do not.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which operand pair was being checked.
        what: &'static str,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A joint-group boundary does not split the joint axis.
    #[error("Group boundary {boundary} is outside the joint axis (num_joints = {num_joints})")]
    JointRange {
        /// Requested boundary index.
        boundary: usize,
        /// Number of joints in the heatmap batch.
        num_joints: usize,
    },

    /// A joint index passed to the aggregator is outside the distance matrix.
    #[error("Joint index {index} out of range for {num_joints} joints")]
    JointIndex {
        /// Offending index.
        index: usize,
        /// Number of joint rows available.
        num_joints: usize,
    },
}

impl EvalError {
    /// Construct a [`EvalError::ShapeMismatch`].
    pub fn shape_mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        EvalError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a [`TrainingConfig`].
///
/// [`TrainingConfig`]: crate::config::TrainingConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from (or written to) disk.
    #[error("Cannot access config file `{path}`: {source}")]
    FileRead {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DatasetError
// ---------------------------------------------------------------------------

/// Errors produced while loading samples or assembling batches.
///
/// A failed sample is an upstream failure: it propagates to the epoch loop
/// instead of being dropped from the batch.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// A sample index is out of bounds.
    #[error("Index {idx} out of bounds (dataset has {len} samples)")]
    IndexOutOfBounds {
        /// The requested index.
        idx: usize,
        /// Total length of the dataset.
        len: usize,
    },

    /// Samples inside one batch disagree on an array shape.
    #[error("Inconsistent {field} shape in batch: expected {expected:?}, got {actual:?}")]
    InconsistentShape {
        /// Which sample field disagreed.
        field: &'static str,
        /// Shape of the first sample in the batch.
        expected: Vec<usize>,
        /// Shape of the offending sample.
        actual: Vec<usize>,
    },

    /// A data format error with no further context.
    #[error("Data format error: {0}")]
    Format(String),
}
