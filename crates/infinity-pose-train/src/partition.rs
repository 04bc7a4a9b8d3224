//! Partitioned accuracy for mixed standard / extended batches.
//!
//! A batch of the extended skeleton can mix samples annotated with the full
//! joint set and samples that only carry the standard joints. Scoring them
//! together would let standard-only samples dilute the anatomical accuracy,
//! so the batch is split into three disjoint views:
//!
//! ```text
//!                 joints [0, boundary)     joints [boundary, J)
//! extended  ───►  ┌──────── infinity (all joints) ────────┐
//! samples         │                     │   anatomical    │
//!                 └─────────────────────┴─────────────────┘
//! standard  ───►  ┌──── coco ───────────┐
//! samples         └─────────────────────┘
//! ```
//!
//! A sample is *extended* when any joint at or beyond the boundary has a
//! ground-truth heatmap mass greater than `1`. Peaks are extracted once from
//! the full joint set and sliced afterwards.

use ndarray::{Array2, ArrayView4};

use crate::error::{EvalError, EvalResult};
use crate::heatmap::{PeakExtractor, Peaks};
use crate::metrics::{
    aggregate, check_heatmap_shapes, compute_distances, joint_mass, normalization,
    AccuracyParams, JointAccuracy,
};

/// Accuracy of the three disjoint views of one batch.
#[derive(Debug, Clone)]
pub struct PartitionedAccuracy {
    /// All joints, extended samples only.
    pub infinity: JointAccuracy,
    /// Anatomical joints, extended samples only.
    pub anatomical: JointAccuracy,
    /// Standard joints, standard samples only.
    pub coco: JointAccuracy,
    /// Which samples were classified as extended.
    pub extended_mask: Vec<bool>,
    /// Peaks of the full predicted batch, in batch order.
    pub preds: Peaks,
}

/// Mark the samples that carry ground truth beyond `boundary`.
///
/// Sample `n` is extended when `sum(target[n, k, .., ..]) > 1` for at least
/// one `k >= boundary`.
///
/// # Errors
///
/// [`EvalError::JointRange`] when `boundary` does not lie inside the joint
/// axis.
pub fn extended_sample_mask(target: ArrayView4<'_, f32>, boundary: usize) -> EvalResult<Vec<bool>> {
    let num_joints = target.shape()[1];
    if boundary == 0 || boundary >= num_joints {
        return Err(EvalError::JointRange { boundary, num_joints });
    }
    let mass = joint_mass(&target);
    Ok(mass
        .outer_iter()
        .map(|row| row.iter().skip(boundary).any(|&m| m > 1.0))
        .collect())
}

fn indices_where(mask: &[bool], value: bool) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &m)| (m == value).then_some(i))
        .collect()
}

fn score_view(
    preds: &Peaks,
    gt: &Peaks,
    norm: &Array2<f64>,
    threshold: f64,
) -> EvalResult<JointAccuracy> {
    let dists = compute_distances(preds.coords.view(), gt.coords.view(), norm.view())?;
    let joints: Vec<usize> = (0..preds.num_joints()).collect();
    aggregate(&dists, &joints, threshold)
}

/// Score `output` against `target` separately for the infinity, anatomical
/// and coco views.
///
/// An empty view yields an accuracy with no valid joints and a mean of `0`.
///
/// # Errors
///
/// [`EvalError::ShapeMismatch`] when the heatmap batches differ in shape and
/// [`EvalError::JointRange`] when `boundary` does not split the joint axis.
pub fn accuracy_partitioned(
    output: ArrayView4<'_, f32>,
    target: ArrayView4<'_, f32>,
    boundary: usize,
    extractor: &dyn PeakExtractor,
    params: &AccuracyParams,
) -> EvalResult<PartitionedAccuracy> {
    check_heatmap_shapes(&output, &target)?;
    let extended_mask = extended_sample_mask(target, boundary)?;
    let (n, j, h, w) = output.dim();

    let preds = extractor.extract(output);
    let gt = extractor.extract(target);
    let norm = normalization(n, h, w, params.normalization_divisor);

    let extended = indices_where(&extended_mask, true);
    let standard = indices_where(&extended_mask, false);

    let ext_preds = preds.select_samples(&extended);
    let ext_gt = gt.select_samples(&extended);
    let ext_norm = norm.select(ndarray::Axis(0), &extended);

    let infinity = score_view(&ext_preds, &ext_gt, &ext_norm, params.threshold)?;
    let anatomical = score_view(
        &ext_preds.select_joints(boundary..j),
        &ext_gt.select_joints(boundary..j),
        &ext_norm,
        params.threshold,
    )?;

    let std_norm = norm.select(ndarray::Axis(0), &standard);
    let coco = score_view(
        &preds.select_samples(&standard).select_joints(0..boundary),
        &gt.select_samples(&standard).select_joints(0..boundary),
        &std_norm,
        params.threshold,
    )?;

    Ok(PartitionedAccuracy { infinity, anatomical, coco, extended_mask, preds })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
