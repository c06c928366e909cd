use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::losses::{Reduction, SmoothL1Loss};
use crate::metrics::ThresholdSweep;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub start: f64,
    pub end: f64,
    pub steps: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 0.2,
            steps: 21,
        }
    }
}

impl SweepConfig {
    pub fn build(&self) -> Result<ThresholdSweep> {
        ThresholdSweep::linspace(self.start, self.end, self.steps)
    }
}

/// Settings of one evaluation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Side length of the square input images, in pixels.
    pub img_size: u32,
    /// Name of the training method, used in artifact names.
    pub status: String,
    pub visualize: bool,
    /// Render every `display_interval`-th batch.
    pub display_interval: usize,
    pub show_gt: bool,
    /// Selects the `tgt` or `src` artifact prefix.
    pub is_target: bool,
    pub show_progress: bool,
    pub sweep: SweepConfig,
    /// Tolerances reported as the two headline scores.
    pub headline_alphas: [f64; 2],
    pub keypoint_radius: u32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            img_size: 368,
            status: "eval".to_string(),
            visualize: false,
            display_interval: 50,
            show_gt: true,
            is_target: true,
            show_progress: true,
            sweep: SweepConfig::default(),
            headline_alphas: [0.05, 0.2],
            keypoint_radius: 3,
        }
    }
}

impl EvalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.img_size == 0 {
            return Err(Error::config("img_size must be positive"));
        }
        if self.visualize && self.display_interval == 0 {
            return Err(Error::config("display_interval must be positive"));
        }
        self.sweep.build()?;
        Ok(())
    }

    pub fn domain_prefix(&self) -> &'static str {
        if self.is_target { "tgt" } else { "src" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub beta: f32,
    pub reduction: Reduction,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            beta: 1.0,
            reduction: Reduction::Mean,
        }
    }
}

impl LossConfig {
    pub fn build(&self) -> Result<SmoothL1Loss> {
        SmoothL1Loss::new(self.beta, self.reduction)
    }
}
