//! Heatmap peak extraction and flip-test helpers.
//!
//! A heatmap batch has shape `[N, J, H, W]`. The peak of each joint's `H × W`
//! slice gives its predicted location in grid units: `x` is the column and
//! `y` the row.
//!
//! [`ArgmaxPeakExtractor`] is the default [`PeakExtractor`]. Other decoders
//! (sub-pixel refinement, integral regression) can be plugged into the
//! scoring path through the same trait.

use ndarray::{s, Array3, Array4, ArrayView4, Axis};
use std::ops::Range;

use crate::error::{EvalError, EvalResult};

// ---------------------------------------------------------------------------
// Peaks
// ---------------------------------------------------------------------------

/// Per-joint peak locations and confidences for a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Peaks {
    /// Peak coordinates, shape `[N, J, 2]`, `(x, y)` in grid units.
    pub coords: Array3<f32>,
    /// Peak activation values, shape `[N, J, 1]`.
    pub maxvals: Array3<f32>,
}

impl Peaks {
    /// Number of samples.
    pub fn num_samples(&self) -> usize {
        self.coords.shape()[0]
    }

    /// Number of joints.
    pub fn num_joints(&self) -> usize {
        self.coords.shape()[1]
    }

    /// Keep the samples at `indices`, in that order.
    pub fn select_samples(&self, indices: &[usize]) -> Peaks {
        Peaks {
            coords: self.coords.select(Axis(0), indices),
            maxvals: self.maxvals.select(Axis(0), indices),
        }
    }

    /// Keep the contiguous joint range `joints`.
    ///
    /// The range must lie within `0..num_joints()`.
    pub fn select_joints(&self, joints: Range<usize>) -> Peaks {
        Peaks {
            coords: self.coords.slice(s![.., joints.clone(), ..]).to_owned(),
            maxvals: self.maxvals.slice(s![.., joints, ..]).to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// PeakExtractor
// ---------------------------------------------------------------------------

/// Turns a heatmap batch into per-joint peak coordinates and confidences.
pub trait PeakExtractor {
    /// Extract the peak of every `(sample, joint)` slice of `heatmaps`.
    fn extract(&self, heatmaps: ArrayView4<'_, f32>) -> Peaks;
}

/// Arg-max decoder.
///
/// Ties are broken by the first occurrence in row-major scan order. NaN
/// activations never win. When the maximum activation is not positive the
/// coordinate is reported as `(0, 0)`; an empty spatial grid yields a zero
/// confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgmaxPeakExtractor;

impl PeakExtractor for ArgmaxPeakExtractor {
    fn extract(&self, heatmaps: ArrayView4<'_, f32>) -> Peaks {
        let (n, j, _h, w) = heatmaps.dim();
        let mut coords = Array3::<f32>::zeros((n, j, 2));
        let mut maxvals = Array3::<f32>::zeros((n, j, 1));

        for b in 0..n {
            for k in 0..j {
                let plane = heatmaps.slice(s![b, k, .., ..]);
                if plane.is_empty() {
                    continue;
                }

                let mut best_idx = 0usize;
                let mut best = f32::NEG_INFINITY;
                for (idx, &v) in plane.iter().enumerate() {
                    if v > best {
                        best = v;
                        best_idx = idx;
                    }
                }

                maxvals[[b, k, 0]] = best;
                if best > 0.0 {
                    coords[[b, k, 0]] = (best_idx % w) as f32;
                    coords[[b, k, 1]] = (best_idx / w) as f32;
                }
            }
        }

        Peaks { coords, maxvals }
    }
}

// ---------------------------------------------------------------------------
// Flip test
// ---------------------------------------------------------------------------

/// Undo a horizontal input flip on predicted heatmaps.
///
/// Mirrors the column axis and swaps the channels of every left/right pair.
///
/// # Errors
///
/// [`EvalError::JointIndex`] when a pair references a missing channel.
pub fn flip_back(
    heatmaps: ArrayView4<'_, f32>,
    flip_pairs: &[(usize, usize)],
) -> EvalResult<Array4<f32>> {
    let num_joints = heatmaps.shape()[1];
    for &(a, b) in flip_pairs {
        let index = a.max(b);
        if index >= num_joints {
            return Err(EvalError::JointIndex { index, num_joints });
        }
    }

    let mut flipped = heatmaps.slice(s![.., .., .., ..;-1]).to_owned();
    for &(a, b) in flip_pairs {
        let left = flipped.index_axis(Axis(1), a).to_owned();
        let right = flipped.index_axis(Axis(1), b).to_owned();
        flipped.index_axis_mut(Axis(1), a).assign(&right);
        flipped.index_axis_mut(Axis(1), b).assign(&left);
    }
    Ok(flipped)
}

/// Shift every heatmap one pixel to the right, in place.
///
/// Column 0 keeps its original value.
pub fn shift_right(heatmaps: &mut Array4<f32>) {
    let w = heatmaps.shape()[3];
    if w < 2 {
        return;
    }
    let src = heatmaps.slice(s![.., .., .., ..w - 1]).to_owned();
    heatmaps.slice_mut(s![.., .., .., 1..]).assign(&src);
}

/// Elementwise mean of two heatmap batches.
pub fn average_heatmaps(a: &Array4<f32>, b: &Array4<f32>) -> EvalResult<Array4<f32>> {
    if a.shape() != b.shape() {
        return Err(EvalError::shape_mismatch("flip-test heatmaps", a.shape(), b.shape()));
    }
    Ok((a + b) * 0.5_f32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
