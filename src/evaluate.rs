//! Dataset-wide PCK evaluation of a backbone with one or two prediction heads.

use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use ndarray::{ArrayD, Axis, Ix3, Ix4, s};
use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::dataset::EvalDataset;
use crate::error::{Error, Result};
use crate::keypoints::get_keypoints;
use crate::metrics::{PckAccumulator, PckCurve};
use crate::network::{Network, NoGradGuard, TrainingModeGuard};
use crate::visualization::{ArtifactSink, denormalize, vis_keypoints};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    /// `(alpha, pck)` at the first headline tolerance, 0.05 by default.
    pub pck_low: (f64, f64),
    /// `(alpha, pck)` at the second headline tolerance, 0.2 by default.
    pub pck_high: (f64, f64),
    pub curve: PckCurve,
    pub total_keypoints: usize,
    pub num_batches: usize,
}

impl EvalReport {
    pub fn headline(&self) -> (f64, f64) {
        (self.pck_low.1, self.pck_high.1)
    }

    pub fn summary(&self) -> String {
        format!(
            "PCK@{:.2}={:.4}  PCK@{:.2}={:.4}  (n_batches={}  n_kp={})",
            self.pck_low.0,
            self.pck_low.1,
            self.pck_high.0,
            self.pck_high.1,
            self.num_batches,
            self.total_keypoints
        )
    }
}

fn progress_bar(config: &EvalConfig, len: usize) -> ProgressBar {
    if !config.show_progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64).with_finish(ProgressFinish::AndClear);
    if let Ok(style) = ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len}") {
        pb.set_style(style);
    }
    pb.set_message(format!(
        "Eval {}/{}",
        config.domain_prefix(),
        config.status
    ));
    pb
}

fn ensemble(outputs: Vec<ArrayD<f32>>) -> Result<ArrayD<f32>> {
    let n = outputs.len() as f32;
    let mut iter = outputs.into_iter();
    let Some(mut sum) = iter.next() else {
        return Err(Error::MissingHeads);
    };
    for o in iter {
        if o.shape() != sum.shape() {
            return Err(Error::shape_mismatch(sum.shape(), o.shape()));
        }
        sum += &o;
    }
    Ok(sum / n)
}

/// Evaluates `base_net` followed by `pred_net_1`, `pred_net_2` or their
/// average on every batch of `dataset`.
///
/// All participating networks are in inference mode for the duration of the
/// call and get their previous mode back however the call ends. Gradient
/// tracking is off for the whole loop.
///
/// Returns PCK at the two `config.headline_alphas`, plus the whole curve.
/// An empty dataset gives NaN scores.
pub fn evaluate<'a>(
    base_net: Option<&'a mut dyn Network>,
    pred_net_1: Option<&'a mut dyn Network>,
    pred_net_2: Option<&'a mut dyn Network>,
    dataset: &dyn EvalDataset,
    config: &EvalConfig,
    sink: &mut dyn ArtifactSink,
) -> Result<EvalReport> {
    let base_net = base_net.ok_or(Error::MissingBackbone)?;
    if pred_net_1.is_none() && pred_net_2.is_none() {
        return Err(Error::MissingHeads);
    }
    config.validate()?;
    let sweep = config.sweep.build()?;

    let base_net = TrainingModeGuard::eval(base_net);
    let pred_nets: Vec<_> = [pred_net_1, pred_net_2]
        .into_iter()
        .flatten()
        .map(TrainingModeGuard::eval)
        .collect();

    let img_side_len = config.img_size as f64;
    let domain_prefix = config.domain_prefix();
    let status = &config.status;
    let mean = dataset.mean();
    let std = dataset.std();

    let mut acc = PckAccumulator::new(sweep);
    let pb = progress_bar(config, dataset.len());
    let mut num_batches = 0;
    {
        let _no_grad = NoGradGuard::new();
        for (idx, batch) in dataset.batches().enumerate() {
            let batch = batch?;
            let feats = base_net.forward(&batch.inputs)?;
            let heats = if pred_nets.len() == 1 {
                pred_nets[0].forward(&feats)?
            } else {
                let outputs = pred_nets
                    .iter()
                    .map(|net| net.forward(&feats))
                    .collect::<Result<Vec<_>>>()?;
                ensemble(outputs)?
            };
            let heats = heats.into_dimensionality::<Ix4>()?;

            let kpts = get_keypoints(&heats.view(), img_side_len, img_side_len)?;
            let gt = batch.gt_keypoints.mapv(f64::from);
            if gt.dim().2 < 2 {
                return Err(Error::shape_mismatch(&[gt.dim().0, gt.dim().1, 2], gt.shape()));
            }
            let gt = gt.slice(s![.., .., ..2]);
            acc.update(&kpts.view(), &gt, img_side_len)?;

            if config.visualize && idx % config.display_interval == 0 && kpts.dim().0 > 0 {
                let first = batch
                    .inputs
                    .index_axis(Axis(0), 0)
                    .into_dimensionality::<Ix3>()?;
                let denorm_img = denormalize(&first, mean, std)?;
                let frame = idx / config.display_interval;
                if config.show_gt {
                    vis_keypoints(
                        sink,
                        &format!("{}_{}_gt_kpt/{}", domain_prefix, status, frame),
                        &denorm_img,
                        &gt.index_axis(Axis(0), 0),
                        config.keypoint_radius,
                    )?;
                }
                vis_keypoints(
                    sink,
                    &format!("{}_{}_pred_kpt/{}", domain_prefix, status, frame),
                    &denorm_img,
                    &kpts.index_axis(Axis(0), 0),
                    config.keypoint_radius,
                )?;
            }
            num_batches += 1;
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    let total_keypoints = acc.total();
    let curve = acc.finalize();
    sink.log_curve(
        &format!("{}_{}_PCK_curve", domain_prefix, status),
        &curve.points(),
    )?;

    let [low, high] = config.headline_alphas;
    let report = EvalReport {
        pck_low: (low, curve.at(low)),
        pck_high: (high, curve.at(high)),
        curve,
        total_keypoints,
        num_batches,
    };
    log::info!("{}/{}: {}", domain_prefix, status, report.summary());
    Ok(report)
}
