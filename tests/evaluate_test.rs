use std::cell::{Cell, RefCell};

use ndarray::{Array3, Array4, ArrayD};
use pose_da_eval::config::EvalConfig;
use pose_da_eval::dataset::{EvalDataset, InMemoryDataset, KeypointBatch, SyntheticConfig};
use pose_da_eval::network::{FnNetwork, Network, is_grad_enabled};
use pose_da_eval::visualization::MemorySink;
use pose_da_eval::{Error, Result, evaluate};

fn quiet_config(img_size: u32) -> EvalConfig {
    EvalConfig {
        img_size,
        show_progress: false,
        ..Default::default()
    }
}

fn identity() -> FnNetwork<impl Fn(&ArrayD<f32>) -> Result<ArrayD<f32>>> {
    FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()))
}

fn synthetic(jitter: f64, num_batches: usize) -> InMemoryDataset {
    InMemoryDataset::synthetic(&SyntheticConfig {
        num_batches,
        batch_size: 2,
        num_keypoints: 5,
        heatmap_size: 16,
        img_size: 64,
        jitter,
        seed: 3,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_perfect_predictions() {
    let ds = synthetic(0.0, 3);
    let (mut base, mut head) = (identity(), identity());
    let mut sink = MemorySink::new();
    let report = evaluate(
        Some(&mut base),
        Some(&mut head),
        None,
        &ds,
        &quiet_config(64),
        &mut sink,
    )
    .unwrap();
    assert_eq!(report.num_batches, 3);
    assert_eq!(report.total_keypoints, 3 * 2 * 5);
    assert_eq!(report.curve.values[0], 0.0);
    assert!(report.curve.values[1..].iter().all(|&v| v == 1.0));
    assert_eq!(report.headline(), (1.0, 1.0));
    assert_eq!(report.pck_low.0, 0.05);
    assert_eq!(sink.curves.len(), 1);
    assert_eq!(sink.curves[0].0, "tgt_eval_PCK_curve");
    assert_eq!(sink.curves[0].1.len(), 21);
    assert!(sink.images.is_empty());
}

#[test]
fn test_jitter_lowers_tight_threshold() {
    let ds = synthetic(3.0, 4);
    let (mut base, mut head) = (identity(), identity());
    let report = evaluate(
        Some(&mut base),
        Some(&mut head),
        None,
        &ds,
        &quiet_config(64),
        &mut MemorySink::new(),
    )
    .unwrap();
    let (low, high) = report.headline();
    assert!(low < 1.0);
    assert!(low <= high);
    assert!(report.curve.values.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_missing_networks_fail_before_running() {
    let ds = synthetic(0.0, 1);
    let mut base = identity();
    let mut head = identity();
    let err = evaluate(
        None,
        Some(&mut head),
        None,
        &ds,
        &quiet_config(64),
        &mut MemorySink::new(),
    );
    assert!(matches!(err, Err(Error::MissingBackbone)));

    let mut sink = MemorySink::new();
    let err = evaluate(Some(&mut base), None, None, &ds, &quiet_config(64), &mut sink);
    assert!(matches!(err, Err(Error::MissingHeads)));
    assert!(sink.curves.is_empty());
    assert!(base.is_training());
}

#[test]
fn test_modes_restored_after_success() {
    let ds = synthetic(0.0, 2);
    let (mut base, mut h1, mut h2) = (identity(), identity(), identity());
    h2.set_training(false);
    evaluate(
        Some(&mut base),
        Some(&mut h1),
        Some(&mut h2),
        &ds,
        &quiet_config(64),
        &mut MemorySink::new(),
    )
    .unwrap();
    assert!(base.is_training());
    assert!(h1.is_training());
    assert!(!h2.is_training());
}

/// A head that fails on its second call and records its mode on every call.
struct FlakyHead {
    training: bool,
    calls: Cell<usize>,
    modes: RefCell<Vec<(bool, bool)>>,
}

impl Network for FlakyHead {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.modes
            .borrow_mut()
            .push((self.training, is_grad_enabled()));
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() == 2 {
            return Err(Error::network("device lost"));
        }
        Ok(input.clone())
    }
    fn is_training(&self) -> bool {
        self.training
    }
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[test]
fn test_modes_restored_after_error() {
    let ds = synthetic(0.0, 3);
    let mut base = identity();
    let mut head = FlakyHead {
        training: true,
        calls: Cell::new(0),
        modes: RefCell::new(Vec::new()),
    };
    let mut sink = MemorySink::new();
    let err = evaluate(
        Some(&mut base),
        None,
        Some(&mut head),
        &ds,
        &quiet_config(64),
        &mut sink,
    );
    assert!(matches!(err, Err(Error::Network(_))));
    assert!(base.is_training());
    assert!(head.is_training());
    // ran in inference mode without gradients
    assert_eq!(*head.modes.borrow(), vec![(false, false), (false, false)]);
    assert!(is_grad_enabled());
    assert!(sink.curves.is_empty());
}

#[test]
fn test_two_heads_are_averaged() {
    // head 1 peaks at column 0, head 2 at column 3 with a larger value;
    // only the average decides.
    let mut ds = InMemoryDataset::new(vec![0.0], vec![1.0]);
    ds.push(Array4::<f32>::zeros((1, 1, 4, 4)).into_dyn(), Array3::zeros((1, 1, 2)))
        .unwrap();
    let mut base = identity();
    let mut h1 = FnNetwork::new(|x: &ArrayD<f32>| {
        let mut y = x.clone();
        y[[0, 0, 0, 0]] = 1.0;
        y[[0, 0, 0, 3]] = 0.0;
        Ok(y)
    });
    let mut h2 = FnNetwork::new(|x: &ArrayD<f32>| {
        let mut y = x.clone();
        y[[0, 0, 0, 0]] = 0.9;
        y[[0, 0, 0, 3]] = 2.5;
        Ok(y)
    });
    let mut config = quiet_config(4);
    config.headline_alphas = [0.0, 0.2];
    let report = evaluate(
        Some(&mut base),
        Some(&mut h1),
        Some(&mut h2),
        &ds,
        &config,
        &mut MemorySink::new(),
    )
    .unwrap();
    // averaged peak at x = 3, gt at x = 0: distance 3 > 0.8
    assert_eq!(report.headline(), (0.0, 0.0));

    let report = evaluate(
        Some(&mut base),
        Some(&mut h1),
        None,
        &ds,
        &config,
        &mut MemorySink::new(),
    )
    .unwrap();
    assert_eq!(report.pck_high.1, 1.0);
}

#[test]
fn test_visualization_names_and_interval() {
    let ds = synthetic(1.0, 5);
    let (mut base, mut head) = (identity(), identity());
    let config = EvalConfig {
        img_size: 64,
        show_progress: false,
        visualize: true,
        display_interval: 2,
        is_target: false,
        status: "mcd".to_string(),
        ..Default::default()
    };
    let mut sink = MemorySink::new();
    evaluate(Some(&mut base), Some(&mut head), None, &ds, &config, &mut sink).unwrap();
    assert_eq!(
        sink.image_names(),
        vec![
            "src_mcd_gt_kpt/0",
            "src_mcd_pred_kpt/0",
            "src_mcd_gt_kpt/1",
            "src_mcd_pred_kpt/1",
            "src_mcd_gt_kpt/2",
            "src_mcd_pred_kpt/2",
        ]
    );
    assert_eq!(sink.images[0].1.dimensions(), (16, 16));
    assert_eq!(sink.curves[0].0, "src_mcd_PCK_curve");

    let config = EvalConfig {
        show_gt: false,
        ..config
    };
    let mut sink = MemorySink::new();
    evaluate(Some(&mut base), Some(&mut head), None, &ds, &config, &mut sink).unwrap();
    assert!(sink.image_names().iter().all(|n| n.contains("_pred_kpt/")));
    assert_eq!(sink.images.len(), 3);
}

#[test]
fn test_empty_dataset_gives_nan() {
    let ds = InMemoryDataset::new(vec![], vec![]);
    assert!(ds.is_empty());
    let (mut base, mut head) = (identity(), identity());
    let report = evaluate(
        Some(&mut base),
        Some(&mut head),
        None,
        &ds,
        &quiet_config(64),
        &mut MemorySink::new(),
    )
    .unwrap();
    assert_eq!(report.total_keypoints, 0);
    assert!(report.headline().0.is_nan());
    assert!(report.headline().1.is_nan());
}

#[test]
fn test_ground_truth_needs_two_coordinates() {
    let mut ds = InMemoryDataset::new(vec![0.0], vec![1.0]);
    ds.push(Array4::<f32>::zeros((1, 1, 4, 4)).into_dyn(), Array3::zeros((1, 1, 1)))
        .unwrap();
    let (mut base, mut head) = (identity(), identity());
    let err = evaluate(
        Some(&mut base),
        Some(&mut head),
        None,
        &ds,
        &quiet_config(4),
        &mut MemorySink::new(),
    );
    assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_empty_heatmaps_are_an_error() {
    let ds = synthetic(0.0, 2);
    let mut base = identity();
    let mut head = FnNetwork::new(|x: &ArrayD<f32>| {
        let shape = [x.shape()[0], x.shape()[1], 0, 0];
        Ok(ArrayD::zeros(ndarray::IxDyn(&shape)))
    });
    let err = evaluate(
        Some(&mut base),
        Some(&mut head),
        None,
        &ds,
        &quiet_config(64),
        &mut MemorySink::new(),
    );
    assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    assert!(base.is_training());
    assert!(head.is_training());
}

#[test]
fn test_batches_keep_extras() {
    let b = KeypointBatch::new(
        Array4::<f32>::zeros((1, 1, 2, 2)).into_dyn(),
        Array3::zeros((1, 1, 2)),
    );
    assert!(b.extras.is_empty());
}
