//! Robust distance between two prediction tensors.

use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
}

/// Reduces two same-shaped tensors to a scalar distance.
pub trait Criterion {
    fn loss(&self, input: &ArrayD<f32>, target: &ArrayD<f32>) -> Result<f32>;
}

impl<F> Criterion for F
where
    F: Fn(&ArrayD<f32>, &ArrayD<f32>) -> Result<f32>,
{
    fn loss(&self, input: &ArrayD<f32>, target: &ArrayD<f32>) -> Result<f32> {
        self(input, target)
    }
}

/// Smooth-L1 with a configurable transition point.
///
/// Per element `n = |input - target|` contributes `0.5 * n^2 / beta` when
/// `n < beta` and `n - 0.5 * beta` otherwise. Both branches equal
/// `0.5 * beta` at `n = beta`.
///
/// `beta` is not checked here; `beta <= 0` makes every element take the
/// linear branch. Use [`SmoothL1Loss::new`] for a validated criterion.
pub fn smooth_l1_loss(
    input: &ArrayD<f32>,
    target: &ArrayD<f32>,
    beta: f32,
    reduction: Reduction,
) -> Result<f32> {
    if input.shape() != target.shape() {
        return Err(Error::shape_mismatch(input.shape(), target.shape()));
    }
    let mut total = 0.0f64;
    Zip::from(input).and(target).for_each(|&a, &b| {
        let n = (a - b).abs();
        let l = if n < beta {
            0.5 * n * n / beta
        } else {
            n - 0.5 * beta
        };
        total += l as f64;
    });
    Ok(match reduction {
        Reduction::Mean => (total / input.len() as f64) as f32,
        Reduction::Sum => total as f32,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothL1Loss {
    beta: f32,
    reduction: Reduction,
}

impl SmoothL1Loss {
    pub fn new(beta: f32, reduction: Reduction) -> Result<SmoothL1Loss> {
        if !beta.is_finite() || beta <= 0.0 {
            return Err(Error::config(format!(
                "smooth-l1 beta must be a positive finite number, got {}",
                beta
            )));
        }
        Ok(SmoothL1Loss { beta, reduction })
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }
}

impl Default for SmoothL1Loss {
    fn default() -> Self {
        SmoothL1Loss {
            beta: 1.0,
            reduction: Reduction::Mean,
        }
    }
}

impl Criterion for SmoothL1Loss {
    fn loss(&self, input: &ArrayD<f32>, target: &ArrayD<f32>) -> Result<f32> {
        smooth_l1_loss(input, target, self.beta, self.reduction)
    }
}
