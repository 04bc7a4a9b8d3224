//! Integration tests for partitioned scoring on the extended skeleton.
//!
//! Batches come from [`SyntheticPoseDataset`], where even samples carry all
//! 53 joints and odd samples only the 17 standard joints.

use approx::assert_abs_diff_eq;
use ndarray::{s, Array4};
use infinity_pose_train::config::TrainingConfig;
use infinity_pose_train::dataset::{DataLoader, PoseDataset, SyntheticConfig, SyntheticPoseDataset};
use infinity_pose_train::heatmap::ArgmaxPeakExtractor;
use infinity_pose_train::metrics::AccuracyParams;
use infinity_pose_train::partition::{accuracy_partitioned, extended_sample_mask};
use infinity_pose_train::scoring::{GroupNames, ScoringStrategy};

const BOUNDARY: usize = 17;
const JOINTS: usize = 53;

fn extended_targets(n: usize) -> (SyntheticPoseDataset, Array4<f32>) {
    let ds = SyntheticPoseDataset::new(
        n,
        SyntheticConfig { num_joints: JOINTS, group_boundary: BOUNDARY, heatmap_size: 48, sigma: 2.0 },
    );
    let batch = DataLoader::new(&ds, n, false, 0).iter().next().unwrap().unwrap();
    (ds, batch.target)
}

/// Move joint `k` of sample `n` to the far corner of its heatmap.
fn displace(hm: &mut Array4<f32>, n: usize, k: usize) {
    let (_, _, h, w) = hm.dim();
    hm.slice_mut(s![n, k, .., ..]).fill(0.0);
    hm[[n, k, h - 1, w - 1]] = 1.0;
}

#[test]
fn mask_matches_annotated_samples() {
    let (ds, target) = extended_targets(6);
    let mask = extended_sample_mask(target.view(), BOUNDARY).unwrap();
    let expected: Vec<bool> = (0..6).map(|i| ds.is_extended(i)).collect();
    assert_eq!(mask, expected);
    assert_eq!(mask, vec![true, false, true, false, true, false]);
}

#[test]
fn perfect_predictions_fill_every_group() {
    let (_, target) = extended_targets(4);
    let res = accuracy_partitioned(
        target.view(),
        target.view(),
        BOUNDARY,
        &ArgmaxPeakExtractor,
        &AccuracyParams::default(),
    )
    .unwrap();

    assert_eq!(res.infinity.valid_joints, JOINTS);
    assert_eq!(res.anatomical.valid_joints, JOINTS - BOUNDARY);
    assert_eq!(res.coco.valid_joints, BOUNDARY);
    for group in [&res.infinity, &res.anatomical, &res.coco] {
        assert_abs_diff_eq!(group.mean, 1.0, epsilon = 1e-12);
    }
    assert_eq!(res.preds.coords.dim(), (4, JOINTS, 2));
}

#[test]
fn anatomical_misses_do_not_touch_coco() {
    let (_, target) = extended_targets(4);
    let mut output = target.clone();
    // Samples 0 and 2 are extended; miss their first anatomical joint.
    displace(&mut output, 0, BOUNDARY);
    displace(&mut output, 2, BOUNDARY);

    let res = accuracy_partitioned(
        output.view(),
        target.view(),
        BOUNDARY,
        &ArgmaxPeakExtractor,
        &AccuracyParams::default(),
    )
    .unwrap();

    assert_eq!(res.anatomical.per_joint[0], Some(0.0));
    let n_anat = (JOINTS - BOUNDARY) as f64;
    assert_abs_diff_eq!(res.anatomical.mean, (n_anat - 1.0) / n_anat, epsilon = 1e-12);
    assert_abs_diff_eq!(res.infinity.mean, (JOINTS as f64 - 1.0) / JOINTS as f64, epsilon = 1e-12);
    assert_abs_diff_eq!(res.coco.mean, 1.0, epsilon = 1e-12);
}

#[test]
fn standard_samples_only_affect_coco() {
    let (_, target) = extended_targets(4);
    let mut output = target.clone();
    // Sample 1 is standard-only; miss one of its standard joints.
    displace(&mut output, 1, 0);

    let res = accuracy_partitioned(
        output.view(),
        target.view(),
        BOUNDARY,
        &ArgmaxPeakExtractor,
        &AccuracyParams::default(),
    )
    .unwrap();

    // Two standard samples: joint 0 passes once out of twice.
    assert_eq!(res.coco.per_joint[0], Some(0.5));
    assert_abs_diff_eq!(res.infinity.mean, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(res.anatomical.mean, 1.0, epsilon = 1e-12);
}

#[test]
fn strategy_scores_match_direct_call() {
    let (_, target) = extended_targets(6);
    let mut output = target.clone();
    displace(&mut output, 4, 30);

    let mut cfg = TrainingConfig::default();
    cfg.num_joints = JOINTS;
    let strategy = cfg.scoring_strategy();
    assert_eq!(
        strategy,
        ScoringStrategy::Partitioned { boundary: BOUNDARY, names: GroupNames::default() }
    );

    let params = cfg.accuracy_params();
    let score = strategy.score(output.view(), target.view(), &ArgmaxPeakExtractor, &params).unwrap();
    let direct = accuracy_partitioned(output.view(), target.view(), BOUNDARY, &ArgmaxPeakExtractor, &params)
        .unwrap();

    assert_eq!(score.groups[0].accuracy, direct.infinity);
    assert_eq!(score.groups[1].accuracy, direct.anatomical);
    assert_eq!(score.groups[2].accuracy, direct.coco);
}

#[test]
fn single_group_ignores_partitioning() {
    let ds = SyntheticPoseDataset::new(3, SyntheticConfig { heatmap_size: 32, ..SyntheticConfig::default() });
    let target = DataLoader::new(&ds, 3, false, 0).iter().next().unwrap().unwrap().target;
    assert_eq!(ds.len(), 3);

    let score = ScoringStrategy::SingleGroup
        .score(target.view(), target.view(), &ArgmaxPeakExtractor, &AccuracyParams::default())
        .unwrap();
    assert_eq!(score.groups.len(), 1);
    assert_eq!(score.groups[0].name, "accuracy");
    assert_eq!(score.groups[0].accuracy.valid_joints, 17);
}
