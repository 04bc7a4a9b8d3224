//! Keypoint accuracy (PCK on heatmap peaks).
//!
//! The engine works on peak coordinates in heatmap grid units:
//!
//! 1. [`compute_distances`] normalises predicted and ground-truth peaks by a
//!    per-sample `(height, width)` scale and takes their L2 distance. A joint
//!    whose ground-truth peak is not strictly greater than `1.0` on both axes
//!    carries no annotation and is masked (`None`).
//! 2. [`pass_rate`] turns one joint's distances into the fraction below the
//!    threshold, ignoring masked entries.
//! 3. [`aggregate`] runs `pass_rate` over a list of joints and averages the
//!    joints that had at least one annotated sample.
//!
//! [`accuracy`] chains the three steps for a whole heatmap batch. The
//! partitioned (standard / anatomical) variant lives in
//! [`crate::partition`].

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::error::{EvalError, EvalResult};
use crate::heatmap::{PeakExtractor, Peaks};

/// Legacy marker for a masked distance or an empty joint.
pub const MASKED: f64 = -1.0;

// ---------------------------------------------------------------------------
// AccuracyParams
// ---------------------------------------------------------------------------

/// Numeric constants of the accuracy metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyParams {
    /// A normalised distance strictly below this value is a pass.
    pub threshold: f64,
    /// The normaliser of a `H × W` heatmap is `[H, W] / normalization_divisor`.
    pub normalization_divisor: f64,
}

impl Default for AccuracyParams {
    fn default() -> Self {
        AccuracyParams { threshold: 0.5, normalization_divisor: 10.0 }
    }
}

/// Per-sample normaliser for `num_samples` heatmaps of size `height × width`.
///
/// Row `n` is `[height / divisor, width / divisor]`. The first entry scales
/// the x coordinate and the second the y coordinate, so for non-square
/// heatmaps x is scaled by the height.
pub fn normalization(num_samples: usize, height: usize, width: usize, divisor: f64) -> Array2<f64> {
    let mut norm = Array2::<f64>::zeros((num_samples, 2));
    norm.column_mut(0).fill(height as f64 / divisor);
    norm.column_mut(1).fill(width as f64 / divisor);
    norm
}

// ---------------------------------------------------------------------------
// DistanceMatrix
// ---------------------------------------------------------------------------

/// Normalised distances, shape `[joint, sample]`.
///
/// `None` marks a `(sample, joint)` pair without ground truth. Masked entries
/// never take part in any aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    data: Array2<Option<f64>>,
}

impl DistanceMatrix {
    /// Wrap a `[joint, sample]` array.
    pub fn from_array(data: Array2<Option<f64>>) -> Self {
        DistanceMatrix { data }
    }

    /// Number of joint rows.
    pub fn num_joints(&self) -> usize {
        self.data.nrows()
    }

    /// Number of sample columns.
    pub fn num_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Distances of joint `joint` across all samples.
    pub fn row(&self, joint: usize) -> ArrayView1<'_, Option<f64>> {
        self.data.row(joint)
    }

    /// Distance for one `(sample, joint)` pair.
    pub fn get(&self, sample: usize, joint: usize) -> Option<f64> {
        self.data.get([joint, sample]).copied().flatten()
    }

    /// Underlying `[joint, sample]` array.
    pub fn as_array(&self) -> &Array2<Option<f64>> {
        &self.data
    }

    /// Render with the legacy `-1` marker in place of masked entries.
    pub fn to_sentinel(&self) -> Array2<f64> {
        self.data.mapv(|d| d.unwrap_or(MASKED))
    }
}

/// Normalised L2 distances between predicted and ground-truth peaks.
///
/// `preds` and `targets` have shape `[N, J, 2]` and `normalize` has shape
/// `[N, 2]`. For each `(n, c)` where both ground-truth coordinates exceed
/// `1.0`, both points are divided elementwise by `normalize[n]` and the
/// Euclidean norm of their difference is stored; otherwise the entry is
/// masked. Empty axes are valid and give an empty matrix.
///
/// # Errors
///
/// [`EvalError::ShapeMismatch`] when the three arrays disagree on `N`, `J`
/// or the coordinate axis.
pub fn compute_distances(
    preds: ArrayView3<'_, f32>,
    targets: ArrayView3<'_, f32>,
    normalize: ArrayView2<'_, f64>,
) -> EvalResult<DistanceMatrix> {
    if preds.shape() != targets.shape() {
        return Err(EvalError::shape_mismatch("predicted / target peaks", preds.shape(), targets.shape()));
    }
    let (n, j, dims) = preds.dim();
    if dims != 2 {
        return Err(EvalError::shape_mismatch("peak coordinates", &[n, j, 2], preds.shape()));
    }
    if normalize.shape() != [n, 2] {
        return Err(EvalError::shape_mismatch("normalization", &[n, 2], normalize.shape()));
    }

    let mut data = Array2::<Option<f64>>::from_elem((j, n), None);
    for s in 0..n {
        let (nx, ny) = (normalize[[s, 0]], normalize[[s, 1]]);
        for c in 0..j {
            let (tx, ty) = (targets[[s, c, 0]], targets[[s, c, 1]]);
            if tx > 1.0 && ty > 1.0 {
                let dx = preds[[s, c, 0]] as f64 / nx - tx as f64 / nx;
                let dy = preds[[s, c, 1]] as f64 / ny - ty as f64 / ny;
                data[[c, s]] = Some((dx * dx + dy * dy).sqrt());
            }
        }
    }
    Ok(DistanceMatrix { data })
}

// ---------------------------------------------------------------------------
// Per-joint pass rate
// ---------------------------------------------------------------------------

/// Fraction of annotated distances strictly below `threshold`.
///
/// Returns `None` when every entry is masked.
///
/// ```rust
/// use infinity_pose_train::metrics::pass_rate;
///
/// assert_eq!(pass_rate(&[Some(0.1), None, Some(0.7)], 0.5), Some(0.5));
/// assert_eq!(pass_rate(&[None, None], 0.5), None);
/// ```
pub fn pass_rate<'a, I>(distances: I, threshold: f64) -> Option<f64>
where
    I: IntoIterator<Item = &'a Option<f64>>,
{
    let (valid, passed) = distances
        .into_iter()
        .flatten()
        .fold((0usize, 0usize), |(valid, passed), &d| {
            (valid + 1, passed + usize::from(d < threshold))
        });
    if valid == 0 {
        None
    } else {
        Some(passed as f64 / valid as f64)
    }
}

// ---------------------------------------------------------------------------
// JointAccuracy
// ---------------------------------------------------------------------------

/// Accuracy of one joint group in one batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointAccuracy {
    /// Pass rate per requested joint, `None` when the joint had no annotated
    /// sample.
    pub per_joint: Vec<Option<f64>>,
    /// Mean over the joints with a pass rate; `0.0` when there are none.
    pub mean: f64,
    /// Number of joints that contributed to `mean`.
    pub valid_joints: usize,
}

impl JointAccuracy {
    /// Legacy accuracy vector of length `per_joint.len() + 1`.
    ///
    /// Slot 0 holds the mean, or `0.0` when no joint was valid. Slots `1..`
    /// hold each pass rate or `-1`.
    pub fn to_vector(&self) -> Vec<f64> {
        let head = if self.valid_joints > 0 { self.mean } else { 0.0 };
        std::iter::once(head)
            .chain(self.per_joint.iter().map(|a| a.unwrap_or(MASKED)))
            .collect()
    }
}

/// Pass rates for `joint_indices` (in the given order) and their mean.
///
/// # Errors
///
/// [`EvalError::JointIndex`] when an index has no row in `distances`.
pub fn aggregate(
    distances: &DistanceMatrix,
    joint_indices: &[usize],
    threshold: f64,
) -> EvalResult<JointAccuracy> {
    let num_joints = distances.num_joints();
    let mut per_joint = Vec::with_capacity(joint_indices.len());
    let mut sum = 0.0;
    let mut valid_joints = 0usize;

    for &index in joint_indices {
        if index >= num_joints {
            return Err(EvalError::JointIndex { index, num_joints });
        }
        let rate = pass_rate(distances.row(index), threshold);
        if let Some(r) = rate {
            sum += r;
            valid_joints += 1;
        }
        per_joint.push(rate);
    }

    let mean = if valid_joints > 0 { sum / valid_joints as f64 } else { 0.0 };
    Ok(JointAccuracy { per_joint, mean, valid_joints })
}

// ---------------------------------------------------------------------------
// Batch accuracy
// ---------------------------------------------------------------------------

/// Single-group accuracy of a heatmap batch plus the predicted peaks.
#[derive(Debug, Clone)]
pub struct BatchAccuracy {
    /// Accuracy over every joint.
    pub accuracy: JointAccuracy,
    /// Peaks extracted from the predicted heatmaps.
    pub preds: Peaks,
}

/// Check that predicted and ground-truth heatmaps have identical shapes.
pub(crate) fn check_heatmap_shapes(
    output: &ArrayView4<'_, f32>,
    target: &ArrayView4<'_, f32>,
) -> EvalResult<()> {
    if output.shape() != target.shape() {
        return Err(EvalError::shape_mismatch("output / target heatmaps", output.shape(), target.shape()));
    }
    Ok(())
}

/// PCK of `output` against the ground-truth heatmaps `target`, over all
/// joints.
///
/// Ground-truth locations are the arg-max of the target heatmaps rather than
/// annotated coordinates.
///
/// # Errors
///
/// [`EvalError::ShapeMismatch`] when `output` and `target` differ in shape.
pub fn accuracy(
    output: ArrayView4<'_, f32>,
    target: ArrayView4<'_, f32>,
    extractor: &dyn PeakExtractor,
    params: &AccuracyParams,
) -> EvalResult<BatchAccuracy> {
    check_heatmap_shapes(&output, &target)?;
    let (n, j, h, w) = output.dim();

    let preds = extractor.extract(output);
    let gt = extractor.extract(target);
    let norm = normalization(n, h, w, params.normalization_divisor);

    let dists = compute_distances(preds.coords.view(), gt.coords.view(), norm.view())?;
    let joints: Vec<usize> = (0..j).collect();
    let accuracy = aggregate(&dists, &joints, params.threshold)?;
    Ok(BatchAccuracy { accuracy, preds })
}

/// Sum of every joint's target activations, shape `[N, J]`.
pub(crate) fn joint_mass(target: &ArrayView4<'_, f32>) -> Array2<f32> {
    target.sum_axis(Axis(3)).sum_axis(Axis(2))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heatmap::ArgmaxPeakExtractor;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3, Array4};

    fn unit_norm(n: usize) -> Array2<f64> {
        Array2::ones((n, 2))
    }

    #[test]
    fn masked_sample_is_excluded() {
        // Sample A perfect, sample B has the (0, 0) "no annotation" target.
        let preds = array![[[2.0_f32, 2.0]], [[7.0, 7.0]]];
        let targets = array![[[2.0_f32, 2.0]], [[0.0, 0.0]]];
        let dists = compute_distances(preds.view(), targets.view(), unit_norm(2).view()).unwrap();

        assert_eq!(dists.get(0, 0), Some(0.0));
        assert_eq!(dists.get(1, 0), None);
        assert_eq!(pass_rate(dists.row(0), 0.5), Some(1.0));

        let acc = aggregate(&dists, &[0], 0.5).unwrap();
        assert_eq!(acc.to_vector(), vec![1.0, 1.0]);
        assert_eq!(acc.valid_joints, 1);
    }

    #[test]
    fn three_four_five_distance_fails() {
        let preds = array![[[5.0_f32, 6.0]]];
        let targets = array![[[2.0_f32, 2.0]]];
        let dists = compute_distances(preds.view(), targets.view(), unit_norm(1).view()).unwrap();
        assert_abs_diff_eq!(dists.get(0, 0).unwrap(), 5.0, epsilon = 1e-12);
        assert_eq!(pass_rate(dists.row(0), 0.5), Some(0.0));
    }

    #[test]
    fn boundary_value_one_is_masked() {
        let preds = Array3::<f32>::from_elem((1, 2, 2), 3.0);
        let targets = array![[[1.0_f32, 5.0], [1.01, 1.01]]];
        let dists = compute_distances(preds.view(), targets.view(), unit_norm(1).view()).unwrap();
        assert_eq!(dists.get(0, 0), None);
        assert!(dists.get(0, 1).is_some());
    }

    #[test]
    fn normalization_is_per_axis() {
        let preds = array![[[4.0_f32, 12.0]]];
        let targets = array![[[2.0_f32, 4.0]]];
        let norm = array![[2.0_f64, 8.0]];
        let dists = compute_distances(preds.view(), targets.view(), norm.view()).unwrap();
        // dx = (4-2)/2 = 1, dy = (12-4)/8 = 1
        assert_abs_diff_eq!(dists.get(0, 0).unwrap(), 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn threshold_is_strict() {
        assert_eq!(pass_rate(&[Some(0.5)], 0.5), Some(0.0));
        assert_eq!(pass_rate(&[Some(0.4999)], 0.5), Some(1.0));
    }

    #[test]
    fn empty_joint_list_has_zero_mean() {
        let dists = DistanceMatrix::from_array(Array2::from_elem((2, 3), None));
        let acc = aggregate(&dists, &[0, 1], 0.5).unwrap();
        assert_eq!(acc.valid_joints, 0);
        assert_eq!(acc.mean, 0.0);
        assert_eq!(acc.to_vector(), vec![0.0, -1.0, -1.0]);
    }

    #[test]
    fn aggregate_rejects_missing_row() {
        let dists = DistanceMatrix::from_array(Array2::from_elem((2, 1), Some(0.0)));
        assert_eq!(
            aggregate(&dists, &[2], 0.5),
            Err(EvalError::JointIndex { index: 2, num_joints: 2 })
        );
    }

    #[test]
    fn sentinel_rendering() {
        let dists = DistanceMatrix::from_array(array![[Some(0.25), None]]);
        assert_eq!(dists.to_sentinel(), array![[0.25, -1.0]]);
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let preds = Array3::<f32>::zeros((2, 3, 2));
        let targets = Array3::<f32>::zeros((2, 4, 2));
        assert!(matches!(
            compute_distances(preds.view(), targets.view(), unit_norm(2).view()),
            Err(EvalError::ShapeMismatch { .. })
        ));

        let out = Array4::<f32>::zeros((1, 2, 4, 4));
        let tgt = Array4::<f32>::zeros((1, 2, 4, 5));
        assert!(accuracy(out.view(), tgt.view(), &ArgmaxPeakExtractor, &AccuracyParams::default()).is_err());
    }

    #[test]
    fn heatmap_accuracy_end_to_end() {
        // 20x20 heatmaps -> normaliser 2.0 per axis.
        let mut out = Array4::<f32>::zeros((1, 2, 20, 20));
        let mut tgt = Array4::<f32>::zeros((1, 2, 20, 20));
        tgt[[0, 0, 5, 5]] = 1.0;
        out[[0, 0, 5, 5]] = 0.8; // exact hit
        tgt[[0, 1, 10, 10]] = 1.0;
        out[[0, 1, 10, 14]] = 0.8; // 4 px off -> 2.0 normalised

        let res = accuracy(out.view(), tgt.view(), &ArgmaxPeakExtractor, &AccuracyParams::default()).unwrap();
        assert_eq!(res.accuracy.per_joint, vec![Some(1.0), Some(0.0)]);
        assert_abs_diff_eq!(res.accuracy.mean, 0.5, epsilon = 1e-12);
        assert_eq!(res.preds.coords[[0, 1, 0]], 14.0);
    }

    #[test]
    fn zero_samples_are_valid_input() {
        let out = Array4::<f32>::zeros((0, 3, 8, 8));
        let res = accuracy(out.view(), out.view(), &ArgmaxPeakExtractor, &AccuracyParams::default()).unwrap();
        assert_eq!(res.accuracy.valid_joints, 0);
        assert_eq!(res.accuracy.per_joint.len(), 3);
    }
}
