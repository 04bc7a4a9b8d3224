//! End-to-end tests for [`infinity_pose_train::trainer::Trainer`].
//!
//! The network is a passthrough, so feeding the ground-truth heatmaps as
//! input yields perfect predictions and makes every score predictable.

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array4, Axis};
use infinity_pose_train::config::TrainingConfig;
use infinity_pose_train::dataset::{
    DataLoader, PoseDataset, PoseSample, SyntheticConfig, SyntheticPoseDataset, COCO_FLIP_PAIRS,
};
use infinity_pose_train::error::{DatasetError, TrainError, TrainResult};
use infinity_pose_train::network::{
    HeatmapLoss, JointsMseLoss, Mode, Network, NetworkOutput, NoopOptimizer, Optimizer,
    PassthroughNetwork,
};
use infinity_pose_train::report::{JsonLinesSink, MemorySink};
use infinity_pose_train::trainer::Trainer;
use tempfile::tempdir;

/// Synthetic samples whose input equals their target.
struct IdentityDataset {
    inner: SyntheticPoseDataset,
    fail_at: Option<usize>,
    flip_pairs: Vec<(usize, usize)>,
}

impl IdentityDataset {
    fn new(n: usize, num_joints: usize) -> Self {
        let inner = SyntheticPoseDataset::new(
            n,
            SyntheticConfig { num_joints, heatmap_size: 24, ..SyntheticConfig::default() },
        );
        IdentityDataset { inner, fail_at: None, flip_pairs: Vec::new() }
    }
}

impl PoseDataset for IdentityDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, idx: usize) -> Result<PoseSample, DatasetError> {
        if self.fail_at == Some(idx) {
            return Err(DatasetError::Format(format!("corrupt annotation at {idx}")));
        }
        let mut sample = self.inner.get(idx)?;
        sample.input = sample.target.clone();
        Ok(sample)
    }

    fn name(&self) -> &str {
        "IdentityDataset"
    }

    fn flip_pairs(&self) -> &[(usize, usize)] {
        &self.flip_pairs
    }
}

fn config(num_joints: usize) -> TrainingConfig {
    TrainingConfig {
        num_joints,
        batch_size: 4,
        num_epochs: 2,
        print_freq: 1,
        shuffle: true,
        flip_test: false,
        ..TrainingConfig::default()
    }
}

/// Emits a blank intermediate stage before the passthrough output.
struct TwoStageNetwork;

impl Network for TwoStageNetwork {
    fn forward(&mut self, input: &Array4<f32>) -> TrainResult<NetworkOutput> {
        Ok(NetworkOutput::Stages(vec![Array4::zeros(input.raw_dim()), input.clone()]))
    }

    fn set_mode(&mut self, _mode: Mode) {}
}

/// Passes its input through, except on every second forward call where it
/// answers the mirrored image like a trained model would: left and right
/// channels trade places.
struct MirrorAwareNetwork {
    pairs: Vec<(usize, usize)>,
    calls: usize,
}

impl Network for MirrorAwareNetwork {
    fn forward(&mut self, input: &Array4<f32>) -> TrainResult<NetworkOutput> {
        let mirrored = self.calls % 2 == 1;
        self.calls += 1;
        let mut out = input.clone();
        if mirrored {
            for &(a, b) in &self.pairs {
                out.index_axis_mut(Axis(1), a).assign(&input.index_axis(Axis(1), b));
                out.index_axis_mut(Axis(1), b).assign(&input.index_axis(Axis(1), a));
            }
        }
        Ok(NetworkOutput::Single(out))
    }

    fn set_mode(&mut self, _mode: Mode) {}
}

/// Remembers every loss it was asked to apply.
#[derive(Default)]
struct RecordingOptimizer {
    losses: Vec<f32>,
}

impl Optimizer for RecordingOptimizer {
    fn step(&mut self, _network: &mut dyn Network, loss: f32) -> TrainResult<()> {
        self.losses.push(loss);
        Ok(())
    }
}

#[test]
fn extended_run_reaches_perfect_accuracy() {
    let tmp = tempdir().unwrap();
    let metrics = tmp.path().join("log").join("metrics.jsonl");

    let train_set = IdentityDataset::new(6, 53);
    let valid_set = IdentityDataset::new(4, 53);
    let sink = JsonLinesSink::create(&metrics).unwrap();
    let mut trainer = Trainer::new(config(53), Box::new(sink)).unwrap();

    let result = trainer
        .run(
            &train_set,
            &valid_set,
            &mut PassthroughNetwork::new(),
            &JointsMseLoss::default(),
            &mut NoopOptimizer,
        )
        .unwrap();

    assert_eq!(result.history.len(), 2);
    assert_abs_diff_eq!(result.best_perf, 1.0, epsilon = 1e-12);
    // Ties move the best epoch forward.
    assert_eq!(result.best_epoch, 1);
    for record in &result.history {
        assert_eq!(record.train.samples, 6);
        assert_eq!(record.train.batches, 2);
        assert_abs_diff_eq!(record.train.loss, 0.0);
        let names: Vec<&str> = record.train.groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["infinity", "anatomical", "coco"]);
    }

    // Two epochs of two train records plus one valid record each.
    assert_eq!(trainer.global_steps(), (4, 2));
    drop(trainer);

    let text = std::fs::read_to_string(&metrics).unwrap();
    let records: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 6);
    let valid: Vec<&serde_json::Value> = records.iter().filter(|r| r["phase"] == "val").collect();
    assert_eq!(valid.len(), 2);
    assert_eq!(valid[1]["step"], 1);
    assert_eq!(valid[1]["scalars"]["val/accuracy_infinity_avg"], 1.0);
    assert_eq!(valid[1]["scalars"]["valid_acc_anatomical"], 1.0);
    assert_eq!(valid[1]["scalars"]["valid_loss"], 0.0);

    let train: Vec<&serde_json::Value> = records.iter().filter(|r| r["phase"] == "train").collect();
    assert_eq!(train[0]["scalars"]["epoch"], 0.0);
    assert_eq!(train[3]["scalars"]["epoch"], 1.0);
    assert!(train[3]["scalars"].get("train_acc_coco").is_some());
    assert!(train[0]["scalars"].get("speed").is_some());
    assert!(train[0]["scalars"].get("train_loss").is_some());
}

#[test]
fn flip_test_with_shift_keeps_perfect_peaks() {
    let valid_set = IdentityDataset::new(5, 17);
    let loader = DataLoader::new(&valid_set, 2, false, 0);
    let cfg = TrainingConfig { flip_test: true, shift_heatmap: true, ..config(17) };
    let mut trainer = Trainer::new(cfg, Box::new(MemorySink::default())).unwrap();

    let summary = trainer
        .validate(&loader, &mut PassthroughNetwork::new(), &JointsMseLoss::default())
        .unwrap();

    assert_eq!(summary.groups, vec![("accuracy".to_string(), 1.0)]);
    assert_eq!(summary.indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(summary.preds.dim(), (5, 17, 2));
    // Shifting the flipped copy makes the averaged heatmap differ from the
    // target, so the loss is no longer zero.
    assert!(summary.loss > 0.0);
}

#[test]
fn flip_test_swaps_the_dataset_pairs() {
    let mut valid_set = IdentityDataset::new(4, 17);
    valid_set.flip_pairs = COCO_FLIP_PAIRS.to_vec();
    let loader = DataLoader::new(&valid_set, 2, false, 0);
    let cfg = TrainingConfig { flip_test: true, shift_heatmap: false, ..config(17) };

    // A model that answers the mirror with swapped sides is restored exactly.
    let mut trainer = Trainer::new(cfg.clone(), Box::new(MemorySink::default())).unwrap();
    let mut net = MirrorAwareNetwork { pairs: COCO_FLIP_PAIRS.to_vec(), calls: 0 };
    let summary = trainer.validate(&loader, &mut net, &JointsMseLoss::default()).unwrap();
    assert_eq!(net.calls, 4);
    assert_eq!(summary.groups, vec![("accuracy".to_string(), 1.0)]);
    assert_abs_diff_eq!(summary.loss, 0.0);

    // Without the side swap in the model, undoing the flip mixes left and
    // right channels.
    let mut trainer = Trainer::new(cfg, Box::new(MemorySink::default())).unwrap();
    let summary = trainer
        .validate(&loader, &mut PassthroughNetwork::new(), &JointsMseLoss::default())
        .unwrap();
    assert!(summary.loss > 0.0);
}

#[test]
fn flip_pairs_beyond_the_heatmaps_are_rejected() {
    let mut valid_set = IdentityDataset::new(2, 17);
    valid_set.flip_pairs = vec![(16, 17)];
    let loader = DataLoader::new(&valid_set, 2, false, 0);
    let cfg = TrainingConfig { flip_test: true, ..config(17) };
    let mut trainer = Trainer::new(cfg, Box::new(MemorySink::default())).unwrap();

    let err = trainer
        .validate(&loader, &mut PassthroughNetwork::new(), &JointsMseLoss::default())
        .unwrap_err();
    assert!(matches!(err, TrainError::Eval(_)));
}

#[test]
fn zero_print_frequency_is_a_config_error() {
    let cfg = TrainingConfig { print_freq: 0, ..config(17) };
    match Trainer::new(cfg, Box::new(MemorySink::default())) {
        Err(TrainError::Config(_)) => {}
        Err(other) => panic!("expected a config error, got {other:?}"),
        Ok(_) => panic!("zero print_freq was accepted"),
    }
}

#[test]
fn stage_losses_are_summed_and_final_stage_scored() {
    let train_set = IdentityDataset::new(4, 17);
    let loader = DataLoader::new(&train_set, 4, false, 0);
    let mut trainer = Trainer::new(config(17), Box::new(MemorySink::default())).unwrap();
    let mut optimizer = RecordingOptimizer::default();
    let loss_fn = JointsMseLoss::default();

    let summary = trainer
        .train_epoch(0, &loader, &mut TwoStageNetwork, &loss_fn, &mut optimizer)
        .unwrap();

    let batch = loader.iter().next().unwrap().unwrap();
    let blank = Array4::<f32>::zeros(batch.target.raw_dim());
    let expected = loss_fn.loss(&blank, &batch.target, &batch.target_weight).unwrap()
        + loss_fn.loss(&batch.target, &batch.target, &batch.target_weight).unwrap();

    assert_eq!(optimizer.losses.len(), 1);
    assert_abs_diff_eq!(optimizer.losses[0], expected, epsilon = 1e-7);
    assert!(expected > 0.0);
    assert_abs_diff_eq!(summary.groups[0].1, 1.0, epsilon = 1e-12);
}

#[test]
fn reports_follow_print_frequency() {
    let train_set = IdentityDataset::new(9, 17);
    let loader = DataLoader::new(&train_set, 2, false, 0);
    let cfg = TrainingConfig { print_freq: 2, ..config(17) };
    let mut trainer = Trainer::new(cfg, Box::new(MemorySink::default())).unwrap();

    let summary = trainer
        .train_epoch(0, &loader, &mut PassthroughNetwork::new(), &JointsMseLoss::default(), &mut NoopOptimizer)
        .unwrap();

    // Five batches, reported at 0, 2 and 4.
    assert_eq!(summary.batches, 5);
    assert_eq!(trainer.global_steps(), (3, 0));
}

#[test]
fn frozen_layers_reach_the_network() {
    let train_set = IdentityDataset::new(2, 17);
    let loader = DataLoader::new(&train_set, 2, false, 0);
    let cfg = TrainingConfig { frozen_layers: vec!["stem".into(), "stage1".into()], ..config(17) };
    let mut trainer = Trainer::new(cfg, Box::new(MemorySink::default())).unwrap();
    let mut net = PassthroughNetwork::new();

    trainer
        .train_epoch(0, &loader, &mut net, &JointsMseLoss::default(), &mut NoopOptimizer)
        .unwrap();
    assert_eq!(net.frozen_layers(), &["stem".to_string(), "stage1".to_string()]);
}

#[test]
fn dataset_failure_stops_the_epoch() {
    let mut train_set = IdentityDataset::new(8, 17);
    train_set.fail_at = Some(5);
    let loader = DataLoader::new(&train_set, 2, false, 0);
    let mut trainer = Trainer::new(config(17), Box::new(MemorySink::default())).unwrap();
    let mut optimizer = RecordingOptimizer::default();

    let err = trainer
        .train_epoch(0, &loader, &mut PassthroughNetwork::new(), &JointsMseLoss::default(), &mut optimizer)
        .unwrap_err();

    assert!(matches!(err, TrainError::Dataset(DatasetError::Format(_))));
    // Batches [0, 1] and [2, 3] ran before the failing one.
    assert_eq!(optimizer.losses.len(), 2);
}

#[test]
fn mismatched_loss_weights_are_fatal() {
    let out = Array4::<f32>::zeros((2, 17, 8, 8));
    let weights = Array2::<f32>::ones((2, 3));
    let err = JointsMseLoss::default().loss(&out, &out, &weights).unwrap_err();
    assert!(matches!(err, TrainError::Eval(_)));
}
