//! Collaborator interfaces for the network, its optimizer and the loss.
//!
//! The model architecture and gradient computation live outside this crate.
//! [`crate::trainer::Trainer`] only needs a forward pass that produces
//! heatmaps, a loss over those heatmaps and an update step.

use ndarray::{Array2, Array4, Axis};

use crate::error::{EvalError, TrainResult};

/// Whether the network runs in training or inference mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dropout / batch-norm updates enabled.
    Train,
    /// Inference mode.
    Eval,
}

/// Heatmaps returned by one forward pass.
#[derive(Debug, Clone)]
pub enum NetworkOutput {
    /// One heatmap batch `[B, J, H, W]`.
    Single(Array4<f32>),
    /// Intermediate-supervision outputs, ordered from first to final stage.
    Stages(Vec<Array4<f32>>),
}

impl NetworkOutput {
    /// All heatmap batches in stage order.
    pub fn stages(&self) -> &[Array4<f32>] {
        match self {
            NetworkOutput::Single(hm) => std::slice::from_ref(hm),
            NetworkOutput::Stages(v) => v,
        }
    }

    /// The heatmaps that are scored: the final stage.
    ///
    /// Returns `None` for an empty stage list.
    pub fn final_stage(&self) -> Option<&Array4<f32>> {
        self.stages().last()
    }

    /// Consume the output and keep the final stage.
    pub fn into_final(self) -> Option<Array4<f32>> {
        match self {
            NetworkOutput::Single(hm) => Some(hm),
            NetworkOutput::Stages(mut v) => v.pop(),
        }
    }
}

/// A heatmap-producing model.
pub trait Network {
    /// Run the forward pass on an input batch `[B, C, H_in, W_in]`.
    fn forward(&mut self, input: &Array4<f32>) -> TrainResult<NetworkOutput>;

    /// Switch between training and inference behaviour.
    fn set_mode(&mut self, mode: Mode);

    /// Stop gradient updates for the named layers.
    fn freeze_layers(&mut self, _layers: &[String]) -> TrainResult<()> {
        Ok(())
    }
}

/// Applies one update step after the loss of a batch is known.
pub trait Optimizer {
    /// Back-propagate `loss` through `network` and update its parameters.
    fn step(&mut self, network: &mut dyn Network, loss: f32) -> TrainResult<()>;
}

/// Loss between predicted and ground-truth heatmaps.
pub trait HeatmapLoss {
    /// `output` and `target` are `[B, J, H, W]`; `target_weight` is `[B, J]`.
    fn loss(
        &self,
        output: &Array4<f32>,
        target: &Array4<f32>,
        target_weight: &Array2<f32>,
    ) -> TrainResult<f32>;
}

/// Per-joint mean squared error, averaged over joints.
///
/// For every joint `j`: `0.5 * mean_{b,h,w}((p - t)²)`, where both heatmaps
/// are first multiplied by `target_weight[b, j]` when `use_target_weight` is
/// set.
#[derive(Debug, Clone, Copy)]
pub struct JointsMseLoss {
    /// Scale each joint by its target weight.
    pub use_target_weight: bool,
}

impl Default for JointsMseLoss {
    fn default() -> Self {
        JointsMseLoss { use_target_weight: true }
    }
}

impl HeatmapLoss for JointsMseLoss {
    fn loss(
        &self,
        output: &Array4<f32>,
        target: &Array4<f32>,
        target_weight: &Array2<f32>,
    ) -> TrainResult<f32> {
        if output.shape() != target.shape() {
            return Err(EvalError::shape_mismatch("loss output / target", output.shape(), target.shape()).into());
        }
        let (b, j, _, _) = output.dim();
        if target_weight.shape() != [b, j] {
            return Err(EvalError::shape_mismatch("target weight", &[b, j], target_weight.shape()).into());
        }
        if j == 0 || output.is_empty() {
            return Ok(0.0);
        }

        let mut total = 0.0_f64;
        for k in 0..j {
            let pred = output.index_axis(Axis(1), k);
            let gt = target.index_axis(Axis(1), k);
            let mut sq = 0.0_f64;
            for n in 0..b {
                let w = if self.use_target_weight { target_weight[[n, k]] } else { 1.0 };
                for (p, t) in pred.index_axis(Axis(0), n).iter().zip(gt.index_axis(Axis(0), n).iter()) {
                    let d = (p * w - t * w) as f64;
                    sq += d * d;
                }
            }
            total += 0.5 * sq / pred.len() as f64;
        }
        Ok((total / j as f64) as f32)
    }
}

/// Returns its input as the predicted heatmaps.
///
/// Used for pipeline dry runs, where inputs are already heatmap-shaped.
#[derive(Debug, Clone)]
pub struct PassthroughNetwork {
    mode: Mode,
    frozen: Vec<String>,
}

impl PassthroughNetwork {
    /// A passthrough network in training mode.
    pub fn new() -> Self {
        PassthroughNetwork { mode: Mode::Train, frozen: Vec::new() }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Layers frozen so far.
    pub fn frozen_layers(&self) -> &[String] {
        &self.frozen
    }
}

impl Default for PassthroughNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Network for PassthroughNetwork {
    fn forward(&mut self, input: &Array4<f32>) -> TrainResult<NetworkOutput> {
        Ok(NetworkOutput::Single(input.clone()))
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn freeze_layers(&mut self, layers: &[String]) -> TrainResult<()> {
        self.frozen.extend(layers.iter().cloned());
        Ok(())
    }
}

/// An optimizer that leaves the network untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOptimizer;

impl Optimizer for NoopOptimizer {
    fn step(&mut self, _network: &mut dyn Network, _loss: f32) -> TrainResult<()> {
        Ok(())
    }
}
