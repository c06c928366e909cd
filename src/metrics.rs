//! PCK (Percentage of Correct Keypoints) over a sweep of tolerances.
//!
//! A keypoint is correct when its Euclidean pixel distance from the ground
//! truth is strictly below `alpha * img_side_len`. Per-batch counts are kept
//! unnormalized by [`PckAccumulator`] so that uneven batch sizes do not bias
//! the final percentage.

use ndarray::{Array2, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered, non-decreasing normalized distance thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSweep {
    values: Vec<f64>,
}

impl ThresholdSweep {
    /// `steps` values linearly spaced over `[start, end]`, both inclusive.
    pub fn linspace(start: f64, end: f64, steps: usize) -> Result<ThresholdSweep> {
        if steps == 0 {
            return Err(Error::config("threshold sweep needs at least one step"));
        }
        if !(start.is_finite() && end.is_finite()) || end < start {
            return Err(Error::config(format!(
                "threshold sweep must be non-decreasing, got {} -> {}",
                start, end
            )));
        }
        let values = if steps == 1 {
            vec![start]
        } else {
            let step = (end - start) / (steps - 1) as f64;
            (0..steps).map(|i| start + step * i as f64).collect()
        };
        Ok(ThresholdSweep { values })
    }

    pub fn from_values(values: Vec<f64>) -> Result<ThresholdSweep> {
        if values.is_empty() {
            return Err(Error::config("threshold sweep needs at least one value"));
        }
        if values.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(Error::config("threshold sweep must be non-decreasing"));
        }
        Ok(ThresholdSweep { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of the threshold closest to `alpha`; the first one on ties.
    pub fn index_of(&self, alpha: f64) -> usize {
        nearest_index(&self.values, alpha)
    }
}

impl Default for ThresholdSweep {
    /// 21 thresholds from 0 to 0.2.
    fn default() -> Self {
        let values = (0..21).map(|i| 0.2 * i as f64 / 20.0).collect();
        ThresholdSweep { values }
    }
}

fn nearest_index(values: &[f64], alpha: f64) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if (v - alpha).abs() < (values[best] - alpha).abs() {
            best = i;
        }
    }
    best
}

fn distances(pred: &ArrayView3<f64>, gt: &ArrayView3<f64>) -> Result<Array2<f64>> {
    let (n, c, d) = pred.dim();
    let (gn, gc, gd) = gt.dim();
    if (n, c) != (gn, gc) || d < 2 || gd < 2 {
        return Err(Error::shape_mismatch(pred.shape(), gt.shape()));
    }
    let mut dis = Array2::<f64>::zeros((n, c));
    Zip::from(&mut dis)
        .and(pred.lanes(Axis(2)))
        .and(gt.lanes(Axis(2)))
        .for_each(|out, p, g| {
            let dx = p[0] - g[0];
            let dy = p[1] - g[1];
            *out = (dx * dx + dy * dy).sqrt();
        });
    Ok(dis)
}

/// PCK of one batch.
///
/// `pred` and `gt` are `(N, C, >=2)` with `(x, y)` first on the last axis.
/// Returns `(fraction correct, number correct)`. The fraction of an empty
/// batch is NaN.
pub fn pck(
    pred: &ArrayView3<f64>,
    gt: &ArrayView3<f64>,
    img_side_len: f64,
    alpha: f64,
) -> Result<(f64, usize)> {
    let dis = distances(pred, gt)?;
    let norm_dis = alpha * img_side_len;
    let nkpt = dis.iter().filter(|&&d| d < norm_dis).count();
    Ok((nkpt as f64 / dis.len() as f64, nkpt))
}

/// Correct-keypoint counts for each threshold of `sweep`.
pub fn pck_curve_counts(
    sweep: &[f64],
    pred: &ArrayView3<f64>,
    gt: &ArrayView3<f64>,
    img_side_len: f64,
) -> Result<Vec<usize>> {
    let dis = distances(pred, gt)?;
    Ok(sweep
        .iter()
        .map(|alpha| {
            let norm_dis = alpha * img_side_len;
            dis.iter().filter(|&&d| d < norm_dis).count()
        })
        .collect())
}

/// Normalized PCK value for every threshold of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PckCurve {
    pub thresholds: Vec<f64>,
    pub values: Vec<f64>,
}

impl PckCurve {
    /// PCK at the sweep threshold closest to `alpha`.
    pub fn at(&self, alpha: f64) -> f64 {
        self.values[nearest_index(&self.thresholds, alpha)]
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.thresholds
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .collect()
    }
}

/// Running correct counts per threshold plus the total keypoint count.
pub struct PckAccumulator {
    sweep: ThresholdSweep,
    counts: Vec<usize>,
    total: usize,
}

impl PckAccumulator {
    pub fn new(sweep: ThresholdSweep) -> PckAccumulator {
        let counts = vec![0; sweep.len()];
        PckAccumulator {
            sweep,
            counts,
            total: 0,
        }
    }

    pub fn update(
        &mut self,
        pred: &ArrayView3<f64>,
        gt: &ArrayView3<f64>,
        img_side_len: f64,
    ) -> Result<()> {
        let nkpts = pck_curve_counts(self.sweep.values(), pred, gt, img_side_len)?;
        for (acc, n) in self.counts.iter_mut().zip(nkpts) {
            *acc += n;
        }
        let (n, c, _) = pred.dim();
        self.total += n * c;
        Ok(())
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn sweep(&self) -> &ThresholdSweep {
        &self.sweep
    }

    /// Divides every count by the total. Yields NaN when nothing was seen.
    pub fn finalize(self) -> PckCurve {
        let total = self.total as f64;
        let values = self.counts.iter().map(|&n| n as f64 / total).collect();
        PckCurve {
            thresholds: self.sweep.values,
            values,
        }
    }
}
