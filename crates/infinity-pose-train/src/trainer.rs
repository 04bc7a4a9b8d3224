//! Epoch orchestration: training, validation and best-model tracking.
//!
//! Per batch the [`Trainer`] runs forward → loss → (optimizer step) → score →
//! accumulate, and reports every `print_freq` batches. Reporting only reads
//! the running statistics.

use ndarray::{concatenate, s, Array3, Array4, ArrayView3, Axis};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::dataset::{DataLoader, PoseDataset};
use crate::error::{TrainError, TrainResult};
use crate::heatmap::{average_heatmaps, flip_back, shift_right, ArgmaxPeakExtractor, PeakExtractor};
use crate::meter::RunningStat;
use crate::metrics::AccuracyParams;
use crate::network::{HeatmapLoss, Mode, Network, Optimizer};
use crate::report::{self, GroupMeter, MetricsSink, Phase, ProgressMeters};
use crate::scoring::{BatchScore, ScoringStrategy, SINGLE_GROUP_NAME};

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Averages of one training epoch.
#[derive(Debug, Clone)]
pub struct EpochSummary {
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Loss averaged over samples.
    pub loss: f64,
    /// `(group name, accuracy average)` in report order.
    pub groups: Vec<(String, f64)>,
    /// Batches processed.
    pub batches: usize,
    /// Samples processed.
    pub samples: usize,
    /// Wall time of the epoch in seconds.
    pub elapsed_secs: f64,
}

/// Result of one validation pass.
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    /// Loss averaged over samples.
    pub loss: f64,
    /// `(group name, accuracy average)` in report order.
    pub groups: Vec<(String, f64)>,
    /// Value used to pick the best epoch: the first group's average.
    pub perf_indicator: f64,
    /// Predicted peaks for every validated sample, `[N, J, 2]`.
    pub preds: Array3<f32>,
    /// Peak confidences, `[N, J, 1]`.
    pub maxvals: Array3<f32>,
    /// Dataset index of each row of `preds`.
    pub indices: Vec<usize>,
}

/// One row of [`TrainingResult::history`].
#[derive(Debug, Clone)]
pub struct EpochRecord {
    /// Training averages.
    pub train: EpochSummary,
    /// Validation loss.
    pub valid_loss: f64,
    /// Validation performance indicator.
    pub perf_indicator: f64,
}

/// Outcome of [`Trainer::run`].
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// Epoch with the highest performance indicator.
    pub best_epoch: usize,
    /// Highest performance indicator seen.
    pub best_perf: f64,
    /// Per-epoch history.
    pub history: Vec<EpochRecord>,
    /// Wall time of the run in seconds.
    pub total_time_secs: f64,
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Runs epochs over injected datasets, network, loss and optimizer.
///
/// The configuration is validated and the scoring strategy resolved when the
/// trainer is built. Global step counters and the best result live for one
/// run.
pub struct Trainer {
    config: TrainingConfig,
    strategy: ScoringStrategy,
    params: AccuracyParams,
    extractor: Box<dyn PeakExtractor>,
    sink: Box<dyn MetricsSink>,
    train_step: u64,
    valid_step: u64,
    best: Option<(usize, f64)>,
}

impl Trainer {
    /// Create a trainer using [`ArgmaxPeakExtractor`].
    ///
    /// # Errors
    ///
    /// [`TrainError::Config`] when `config` fails
    /// [`TrainingConfig::validate`].
    pub fn new(config: TrainingConfig, sink: Box<dyn MetricsSink>) -> TrainResult<Self> {
        Self::with_extractor(config, sink, Box::new(ArgmaxPeakExtractor))
    }

    /// Create a trainer with a custom peak decoder.
    ///
    /// # Errors
    ///
    /// [`TrainError::Config`] when `config` fails
    /// [`TrainingConfig::validate`].
    pub fn with_extractor(
        config: TrainingConfig,
        sink: Box<dyn MetricsSink>,
        extractor: Box<dyn PeakExtractor>,
    ) -> TrainResult<Self> {
        config.validate()?;
        let strategy = config.scoring_strategy();
        let params = config.accuracy_params();
        debug!(?strategy, "scoring strategy resolved");
        Ok(Trainer {
            config,
            strategy,
            params,
            extractor,
            sink,
            train_step: 0,
            valid_step: 0,
            best: None,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The scoring strategy chosen at construction.
    pub fn strategy(&self) -> &ScoringStrategy {
        &self.strategy
    }

    /// `(epoch, perf_indicator)` of the best validation so far.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }

    /// Records emitted so far as `(train, valid)`.
    pub fn global_steps(&self) -> (u64, u64) {
        (self.train_step, self.valid_step)
    }

    /// Consume the trainer and hand back its sink.
    pub fn into_sink(self) -> Box<dyn MetricsSink> {
        self.sink
    }

    fn group_meters(&self) -> Vec<GroupMeter> {
        self.strategy
            .group_names()
            .into_iter()
            .zip(self.strategy.group_labels())
            .map(|(name, label)| GroupMeter::new(name, label))
            .collect()
    }

    fn score(&self, output: &Array4<f32>, target: &Array4<f32>) -> TrainResult<BatchScore> {
        Ok(self
            .strategy
            .score(output.view(), target.view(), self.extractor.as_ref(), &self.params)?)
    }

    /// Run one training epoch.
    ///
    /// The loss of a multi-stage output is the sum over stages; only the
    /// final stage is scored.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        loader: &DataLoader<'_>,
        network: &mut dyn Network,
        loss_fn: &dyn HeatmapLoss,
        optimizer: &mut dyn Optimizer,
    ) -> TrainResult<EpochSummary> {
        if !self.config.frozen_layers.is_empty() {
            network.freeze_layers(&self.config.frozen_layers)?;
        }
        network.set_mode(Mode::Train);

        let num_batches = loader.num_batches();
        let mut batch_time = RunningStat::new();
        let mut data_time = RunningStat::new();
        let mut losses = RunningStat::new();
        let mut groups = self.group_meters();
        let mut samples = 0usize;
        let mut batches = 0usize;

        let epoch_start = Instant::now();
        let mut end = Instant::now();
        for (i, batch) in loader.iter().enumerate() {
            let batch = batch?;
            data_time.update(end.elapsed().as_secs_f64(), 1.0);

            let output = network.forward(&batch.input)?;
            let mut loss = 0.0_f32;
            for stage in output.stages() {
                loss += loss_fn.loss(stage, &batch.target, &batch.target_weight)?;
            }
            optimizer.step(network, loss)?;

            let heatmaps = output
                .final_stage()
                .ok_or_else(|| TrainError::network("forward pass returned no heatmaps"))?;
            let n = batch.len();
            losses.update(f64::from(loss), n as f64);

            let score = self.score(heatmaps, &batch.target)?;
            for (meter, group) in groups.iter_mut().zip(&score.groups) {
                meter.stat.update(group.accuracy.mean, group.accuracy.valid_joints as f64);
            }

            batch_time.update(end.elapsed().as_secs_f64(), 1.0);
            end = Instant::now();
            samples += n;
            batches += 1;

            if i % self.config.print_freq == 0 {
                let speed = if batch_time.val() > 0.0 { n as f64 / batch_time.val() } else { 0.0 };
                let meters = ProgressMeters {
                    batch_time: &batch_time,
                    data_time: &data_time,
                    loss: &losses,
                };
                info!("{}", report::train_progress(epoch, i, num_batches, speed, meters, &groups));

                let mut scalars = vec![("epoch".to_string(), epoch as f64)];
                scalars.extend(averaged_scalars(Phase::Train, &losses, &groups));
                scalars.push(("speed".to_string(), speed));
                scalars.extend(series_scalars(Phase::Train, &losses, &groups));
                self.sink.record(Phase::Train, self.train_step, &scalars)?;
                self.train_step += 1;
            }
        }

        Ok(EpochSummary {
            epoch,
            loss: losses.avg(),
            groups: averages(&groups),
            batches,
            samples,
            elapsed_secs: epoch_start.elapsed().as_secs_f64(),
        })
    }

    /// Run one validation pass without updating the network.
    ///
    /// With `flip_test` set, the horizontally mirrored input is also
    /// forwarded; its heatmaps are flipped back using the validation set's
    /// [`PoseDataset::flip_pairs`] (and shifted one pixel when
    /// `shift_heatmap` is set) and averaged with the primary output before
    /// the loss and the scores are computed.
    pub fn validate(
        &mut self,
        loader: &DataLoader<'_>,
        network: &mut dyn Network,
        loss_fn: &dyn HeatmapLoss,
    ) -> TrainResult<ValidationSummary> {
        network.set_mode(Mode::Eval);

        let num_batches = loader.num_batches();
        let mut batch_time = RunningStat::new();
        let mut losses = RunningStat::new();
        let mut groups = self.group_meters();
        let mut coords = Vec::with_capacity(num_batches);
        let mut maxvals = Vec::with_capacity(num_batches);
        let mut indices = Vec::with_capacity(loader.dataset().len());
        let flip_pairs = loader.dataset().flip_pairs();

        let mut end = Instant::now();
        for (i, batch) in loader.iter().enumerate() {
            let batch = batch?;
            let mut output = network
                .forward(&batch.input)?
                .into_final()
                .ok_or_else(|| TrainError::network("forward pass returned no heatmaps"))?;

            if self.config.flip_test {
                let mirrored = batch.input.slice(s![.., .., .., ..;-1]).to_owned();
                let flipped = network
                    .forward(&mirrored)?
                    .into_final()
                    .ok_or_else(|| TrainError::network("forward pass returned no heatmaps"))?;
                let mut flipped = flip_back(flipped.view(), flip_pairs)?;
                if self.config.shift_heatmap {
                    shift_right(&mut flipped);
                }
                output = average_heatmaps(&output, &flipped)?;
            }

            let loss = loss_fn.loss(&output, &batch.target, &batch.target_weight)?;
            let n = batch.len();
            losses.update(f64::from(loss), n as f64);

            let score = self.score(&output, &batch.target)?;
            for (meter, group) in groups.iter_mut().zip(&score.groups) {
                meter.stat.update(group.accuracy.mean, group.accuracy.valid_joints as f64);
            }
            coords.push(score.preds.coords);
            maxvals.push(score.preds.maxvals);
            indices.extend_from_slice(&batch.indices);

            batch_time.update(end.elapsed().as_secs_f64(), 1.0);
            end = Instant::now();

            if i % self.config.print_freq == 0 {
                info!("{}", report::valid_progress(i, num_batches, &batch_time, &losses, &groups));
            }
        }

        let num_joints = self.config.num_joints;
        let preds = stack_rows(&coords, (0, num_joints, 2))?;
        let maxvals = stack_rows(&maxvals, (0, num_joints, 1))?;

        let name_values = averages(&groups);
        for line in report::name_value_table(&name_values, &self.config.model_name) {
            info!("{line}");
        }
        let perf_indicator = name_values.first().map(|(_, v)| *v).unwrap_or(0.0);

        let mut scalars = averaged_scalars(Phase::Valid, &losses, &groups);
        scalars.extend(series_scalars(Phase::Valid, &losses, &groups));
        self.sink.record(Phase::Valid, self.valid_step, &scalars)?;
        self.valid_step += 1;

        Ok(ValidationSummary {
            loss: losses.avg(),
            groups: name_values,
            perf_indicator,
            preds,
            maxvals,
            indices,
        })
    }

    /// Train for `num_epochs`, validating after every epoch.
    ///
    /// The training set is reshuffled each epoch with `seed + epoch`; the
    /// validation set is visited in order. An epoch whose performance
    /// indicator is at least the best so far becomes the new best.
    pub fn run(
        &mut self,
        train_set: &dyn PoseDataset,
        valid_set: &dyn PoseDataset,
        network: &mut dyn Network,
        loss_fn: &dyn HeatmapLoss,
        optimizer: &mut dyn Optimizer,
    ) -> TrainResult<TrainingResult> {
        if train_set.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        info!(
            "Training on {} ({} samples), validating on {} ({} samples)",
            train_set.name(),
            train_set.len(),
            valid_set.name(),
            valid_set.len()
        );

        let start = Instant::now();
        let batch_size = self.config.batch_size;
        let valid_loader = DataLoader::new(valid_set, batch_size, false, self.config.seed);
        let mut history = Vec::with_capacity(self.config.num_epochs);

        for epoch in 0..self.config.num_epochs {
            let seed = self.config.seed.wrapping_add(epoch as u64);
            let train_loader = DataLoader::new(train_set, batch_size, self.config.shuffle, seed);

            let train = self.train_epoch(epoch, &train_loader, network, loss_fn, optimizer)?;
            let valid = self.validate(&valid_loader, network, loss_fn)?;

            let improved = self.best.map_or(true, |(_, best)| valid.perf_indicator >= best);
            if improved {
                self.best = Some((epoch, valid.perf_indicator));
            }
            info!(
                "=> epoch {epoch}: train loss {:.5}, valid loss {:.5}, perf {:.4}{}",
                train.loss,
                valid.loss,
                valid.perf_indicator,
                if improved { " (best)" } else { "" }
            );

            history.push(EpochRecord {
                train,
                valid_loss: valid.loss,
                perf_indicator: valid.perf_indicator,
            });
        }
        self.sink.flush()?;

        let (best_epoch, best_perf) = self.best.unwrap_or((0, 0.0));
        Ok(TrainingResult {
            best_epoch,
            best_perf,
            history,
            total_time_secs: start.elapsed().as_secs_f64(),
        })
    }
}

fn averages(groups: &[GroupMeter]) -> Vec<(String, f64)> {
    groups.iter().map(|g| (g.name.clone(), g.stat.avg())).collect()
}

/// `<phase>/loss_avg` plus `<phase>/accuracy_avg` (single group) or
/// `<phase>/accuracy_<group>_avg`.
fn averaged_scalars(phase: Phase, loss: &RunningStat, groups: &[GroupMeter]) -> Vec<(String, f64)> {
    let prefix = phase.prefix();
    let mut out = vec![(format!("{prefix}/loss_avg"), loss.avg())];
    for g in groups {
        let key = if g.name == SINGLE_GROUP_NAME {
            format!("{prefix}/accuracy_avg")
        } else {
            format!("{prefix}/accuracy_{}_avg", g.name)
        };
        out.push((key, g.stat.avg()));
    }
    out
}

/// `<series>_loss` plus `<series>_acc` (single group) or
/// `<series>_acc_<group>`.
///
/// Training reports the latest batch values, validation the pass averages.
fn series_scalars(phase: Phase, loss: &RunningStat, groups: &[GroupMeter]) -> Vec<(String, f64)> {
    let series = phase.series();
    let value = |s: &RunningStat| match phase {
        Phase::Train => s.val(),
        Phase::Valid => s.avg(),
    };
    let mut out = vec![(format!("{series}_loss"), value(loss))];
    for g in groups {
        let key = if g.name == SINGLE_GROUP_NAME {
            format!("{series}_acc")
        } else {
            format!("{series}_acc_{}", g.name)
        };
        out.push((key, value(&g.stat)));
    }
    out
}

fn stack_rows(parts: &[Array3<f32>], empty: (usize, usize, usize)) -> TrainResult<Array3<f32>> {
    if parts.is_empty() {
        return Ok(Array3::zeros(empty));
    }
    let views: Vec<ArrayView3<'_, f32>> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views)
        .map_err(|e| TrainError::network(format!("cannot stack predictions: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
