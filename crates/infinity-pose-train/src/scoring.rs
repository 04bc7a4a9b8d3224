//! Scoring strategies.
//!
//! The strategy is resolved once from the configuration
//! ([`crate::config::TrainingConfig::scoring_strategy`]) and then applied to
//! every batch:
//!
//! - [`ScoringStrategy::SingleGroup`]: one accuracy over all joints.
//! - [`ScoringStrategy::Partitioned`]: three disjoint groups, see
//!   [`crate::partition`].

use ndarray::ArrayView4;
use serde::{Deserialize, Serialize};

use crate::error::EvalResult;
use crate::heatmap::{PeakExtractor, Peaks};
use crate::metrics::{accuracy, AccuracyParams, JointAccuracy};
use crate::partition::accuracy_partitioned;

/// Name of the only group reported by [`ScoringStrategy::SingleGroup`].
pub const SINGLE_GROUP_NAME: &str = "accuracy";

/// Label of the only group in progress lines.
pub const SINGLE_GROUP_LABEL: &str = "Accuracy";

/// Report names of the partitioned groups.
///
/// Names key the recorded scalars; labels are shown in progress lines.
/// Fields missing from a config file keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupNames {
    /// All joints of extended samples.
    pub extended: String,
    /// Anatomical joints of extended samples.
    pub anatomical: String,
    /// Standard joints of standard samples.
    pub standard: String,
    /// Display labels in infinity / anatomical / coco order.
    pub labels: [String; 3],
}

impl Default for GroupNames {
    fn default() -> Self {
        GroupNames {
            extended: "infinity".to_string(),
            anatomical: "anatomical".to_string(),
            standard: "coco".to_string(),
            labels: [
                "Accuracy Infinity".to_string(),
                "Accuracy Anatomical".to_string(),
                "Accuracy COCO".to_string(),
            ],
        }
    }
}

/// How a batch is turned into group accuracies.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringStrategy {
    /// Every joint of every sample in one group.
    SingleGroup,
    /// Disjoint infinity / anatomical / coco groups split at `boundary`.
    Partitioned {
        /// First anatomical joint index.
        boundary: usize,
        /// Report names, in infinity / anatomical / coco order.
        names: GroupNames,
    },
}

/// Accuracy of one named group for one batch.
#[derive(Debug, Clone)]
pub struct GroupScore {
    /// Report name of the group.
    pub name: String,
    /// The group's accuracy.
    pub accuracy: JointAccuracy,
}

/// Everything the epoch loop needs from scoring one batch.
#[derive(Debug, Clone)]
pub struct BatchScore {
    /// Group accuracies in [`ScoringStrategy::group_names`] order.
    pub groups: Vec<GroupScore>,
    /// Peaks of the full predicted batch.
    pub preds: Peaks,
}

impl ScoringStrategy {
    /// Names of the groups this strategy reports, in report order.
    pub fn group_names(&self) -> Vec<String> {
        match self {
            ScoringStrategy::SingleGroup => vec![SINGLE_GROUP_NAME.to_string()],
            ScoringStrategy::Partitioned { names, .. } => vec![
                names.extended.clone(),
                names.anatomical.clone(),
                names.standard.clone(),
            ],
        }
    }

    /// Progress-line labels, parallel to [`ScoringStrategy::group_names`].
    pub fn group_labels(&self) -> Vec<String> {
        match self {
            ScoringStrategy::SingleGroup => vec![SINGLE_GROUP_LABEL.to_string()],
            ScoringStrategy::Partitioned { names, .. } => names.labels.to_vec(),
        }
    }

    /// Score one batch of predicted heatmaps against the ground truth.
    pub fn score(
        &self,
        output: ArrayView4<'_, f32>,
        target: ArrayView4<'_, f32>,
        extractor: &dyn PeakExtractor,
        params: &AccuracyParams,
    ) -> EvalResult<BatchScore> {
        match self {
            ScoringStrategy::SingleGroup => {
                let res = accuracy(output, target, extractor, params)?;
                Ok(BatchScore {
                    groups: vec![GroupScore {
                        name: SINGLE_GROUP_NAME.to_string(),
                        accuracy: res.accuracy,
                    }],
                    preds: res.preds,
                })
            }
            ScoringStrategy::Partitioned { boundary, names } => {
                let res = accuracy_partitioned(output, target, *boundary, extractor, params)?;
                Ok(BatchScore {
                    groups: vec![
                        GroupScore { name: names.extended.clone(), accuracy: res.infinity },
                        GroupScore { name: names.anatomical.clone(), accuracy: res.anatomical },
                        GroupScore { name: names.standard.clone(), accuracy: res.coco },
                    ],
                    preds: res.preds,
                })
            }
        }
    }
}
