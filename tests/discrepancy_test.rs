use std::cell::RefCell;

use ndarray::{ArrayD, IxDyn};
use pose_da_eval::losses::{Reduction, SmoothL1Loss, smooth_l1_loss};
use pose_da_eval::network::{FnNetwork, Network, is_grad_enabled};
use pose_da_eval::{Result, discrepancy};

fn batch(n: usize, offset: f32) -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[n, 2, 3]), |ix| {
        offset + (ix[0] * 6 + ix[1] * 3 + ix[2]) as f32 * 0.1
    })
}

fn backbone() -> FnNetwork<impl Fn(&ArrayD<f32>) -> Result<ArrayD<f32>>> {
    FnNetwork::new(|x: &ArrayD<f32>| Ok(x.mapv(|v| v * 2.0 - 0.5)))
}

#[test]
fn test_identical_heads_give_zero() {
    let base = backbone();
    let head = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.mapv(f32::sin)));
    let d = discrepancy(
        &batch(3, 0.0),
        &batch(2, 1.0),
        &base,
        &head,
        &head,
        &SmoothL1Loss::default(),
    )
    .unwrap();
    assert_eq!(d.source, 0.0);
    assert_eq!(d.target, 0.0);
    assert_eq!(d.loss, 0.0);
    assert_eq!(d.union_features.shape(), &[5, 2, 3]);
}

#[test]
fn test_swapping_heads_keeps_loss() {
    let base = backbone();
    let h1 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()));
    let h2 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.mapv(|v| v * v)));
    let criterion = SmoothL1Loss::new(0.5, Reduction::Mean).unwrap();
    let (src, tgt) = (batch(2, 0.0), batch(4, 0.7));
    let a = discrepancy(&src, &tgt, &base, &h1, &h2, &criterion).unwrap();
    let b = discrepancy(&src, &tgt, &base, &h2, &h1, &criterion).unwrap();
    assert!(a.loss > 0.0);
    assert_eq!(a.loss, b.loss);
    assert_eq!(a.source, b.source);
    assert_eq!(a.target, b.target);
    assert_eq!(a.loss, (a.source - a.target).abs());
}

#[test]
fn test_matches_direct_computation() {
    let base = backbone();
    let h1 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()));
    let h2 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.mapv(|v| v + 3.0)));
    let (src, tgt) = (batch(1, 0.0), batch(1, 0.0));
    // every element differs by 3 on both domains -> 3 - 0.5 each, diff 0
    let d = discrepancy(&src, &tgt, &base, &h1, &h2, &SmoothL1Loss::default()).unwrap();
    assert!((d.source - 2.5).abs() < 1e-6);
    assert_eq!(d.loss, 0.0);

    let f = base.forward(&src).unwrap();
    let expected = smooth_l1_loss(
        &h1.forward(&f).unwrap(),
        &h2.forward(&f).unwrap(),
        1.0,
        Reduction::Mean,
    )
    .unwrap();
    assert_eq!(d.source, expected);
}

#[test]
fn test_union_features_are_a_copy() {
    let base = backbone();
    let head = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()));
    let src = batch(1, 0.0);
    let tgt = batch(1, 1.0);
    let mut d = discrepancy(&src, &tgt, &base, &head, &head, &SmoothL1Loss::default()).unwrap();
    let before = base.forward(&src).unwrap();
    d.union_features.fill(0.0);
    assert_eq!(base.forward(&src).unwrap(), before);
}

#[test]
fn test_heads_run_with_gradients_enabled() {
    let seen = RefCell::new(Vec::new());
    let base = FnNetwork::new(|x: &ArrayD<f32>| {
        seen.borrow_mut().push(is_grad_enabled());
        Ok(x.clone())
    });
    let head = FnNetwork::new(|x: &ArrayD<f32>| {
        seen.borrow_mut().push(is_grad_enabled());
        Ok(x.clone())
    });
    discrepancy(
        &batch(1, 0.0),
        &batch(1, 0.0),
        &base,
        &head,
        &head,
        &SmoothL1Loss::default(),
    )
    .unwrap();
    // two backbone passes, four head passes
    assert_eq!(seen.borrow().len(), 6);
    assert!(seen.borrow().iter().all(|&g| g));
}

#[test]
fn test_custom_criterion() {
    let base = backbone();
    let h1 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()));
    let h2 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.mapv(|v| v + 1.0)));
    let l1_sum =
        |a: &ArrayD<f32>, b: &ArrayD<f32>| -> Result<f32> { Ok((a - b).mapv(f32::abs).sum()) };
    // source has 2 images (12 elements), target 1 (6 elements)
    let d = discrepancy(&batch(2, 0.0), &batch(1, 0.0), &base, &h1, &h2, &l1_sum).unwrap();
    assert!((d.source - 12.0).abs() < 1e-5);
    assert!((d.target - 6.0).abs() < 1e-5);
    assert!((d.loss - 6.0).abs() < 1e-5);
}
