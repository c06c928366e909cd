use std::collections::HashMap;

use ndarray::{Array3, Array4, ArrayD, s};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keypoints::gaussian_kernel;

/// One batch handed to the evaluation loop.
pub struct KeypointBatch {
    /// Network input, `(N, C, ...)`.
    pub inputs: ArrayD<f32>,
    /// Ground truth `(N, K, >=2)`, `(x, y)` in image pixels first.
    pub gt_keypoints: Array3<f32>,
    /// Anything else the loader produces (target heatmaps, visibility, ...).
    pub extras: HashMap<String, ArrayD<f32>>,
}

impl KeypointBatch {
    pub fn new(inputs: ArrayD<f32>, gt_keypoints: Array3<f32>) -> KeypointBatch {
        KeypointBatch {
            inputs,
            gt_keypoints,
            extras: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, name: &str, value: ArrayD<f32>) -> KeypointBatch {
        self.extras.insert(name.to_string(), value);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.inputs.shape().first().copied().unwrap_or(0)
    }
}

/// A finite sequence of batches plus the per-channel normalization used to
/// build the inputs.
pub trait EvalDataset {
    /// Number of batches.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn mean(&self) -> &[f32];
    fn std(&self) -> &[f32];
    fn batches(&self) -> Box<dyn Iterator<Item = Result<KeypointBatch>> + '_>;
}

pub struct InMemoryDataset {
    batches: Vec<(ArrayD<f32>, Array3<f32>)>,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl InMemoryDataset {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> InMemoryDataset {
        InMemoryDataset {
            batches: Vec::new(),
            mean,
            std,
        }
    }

    pub fn push(&mut self, inputs: ArrayD<f32>, gt_keypoints: Array3<f32>) -> Result<()> {
        let n = inputs.shape().first().copied().unwrap_or(0);
        if n != gt_keypoints.dim().0 {
            return Err(Error::shape_mismatch(
                &[n],
                &[gt_keypoints.dim().0],
            ));
        }
        self.batches.push((inputs, gt_keypoints));
        Ok(())
    }

    /// Builds a deterministic dataset of Gaussian heatmaps.
    ///
    /// Inputs have shape `(batch, keypoints, heatmap, heatmap)`. Each channel
    /// peaks at its ground-truth location moved by a random offset of up to
    /// `jitter` grid cells, so an identity model is not perfect.
    pub fn synthetic(config: &SyntheticConfig) -> Result<InMemoryDataset> {
        config.validate()?;
        let k = config.num_keypoints;
        let hm = config.heatmap_size;
        let scale = config.img_size as f64 / hm as f64;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut dataset = InMemoryDataset::new(vec![0.0; k], vec![1.0; k]);
        for _ in 0..config.num_batches {
            let mut inputs = Array4::<f32>::zeros((config.batch_size, k, hm, hm));
            let mut gt = Array3::<f32>::zeros((config.batch_size, k, 3));
            for b in 0..config.batch_size {
                for j in 0..k {
                    let gx = rng.random_range(0..hm) as f64;
                    let gy = rng.random_range(0..hm) as f64;
                    let (dx, dy) = if config.jitter > 0.0 {
                        (
                            rng.random_range(-config.jitter..=config.jitter),
                            rng.random_range(-config.jitter..=config.jitter),
                        )
                    } else {
                        (0.0, 0.0)
                    };
                    let peak_x = (gx + dx).clamp(0.0, (hm - 1) as f64);
                    let peak_y = (gy + dy).clamp(0.0, (hm - 1) as f64);
                    let g = gaussian_kernel(hm, hm, peak_x, peak_y, config.sigma);
                    inputs.slice_mut(s![b, j, .., ..]).assign(&g);
                    gt[[b, j, 0]] = (gx * scale) as f32;
                    gt[[b, j, 1]] = (gy * scale) as f32;
                    gt[[b, j, 2]] = 1.0;
                }
            }
            dataset.push(inputs.into_dyn(), gt)?;
        }
        log::debug!(
            "synthetic dataset: {} batches of {} x {} keypoints",
            config.num_batches,
            config.batch_size,
            k
        );
        Ok(dataset)
    }
}

impl EvalDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.batches.len()
    }
    fn mean(&self) -> &[f32] {
        &self.mean
    }
    fn std(&self) -> &[f32] {
        &self.std
    }
    fn batches(&self) -> Box<dyn Iterator<Item = Result<KeypointBatch>> + '_> {
        Box::new(
            self.batches
                .iter()
                .map(|(inputs, gt)| Ok(KeypointBatch::new(inputs.clone(), gt.clone()))),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub num_batches: usize,
    pub batch_size: usize,
    pub num_keypoints: usize,
    pub heatmap_size: usize,
    pub img_size: u32,
    pub sigma: f64,
    /// Maximum peak displacement in heatmap cells.
    pub jitter: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_batches: 8,
            batch_size: 4,
            num_keypoints: 15,
            heatmap_size: 46,
            img_size: 368,
            sigma: 1.5,
            jitter: 1.5,
            seed: 0,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.num_keypoints == 0 || self.heatmap_size == 0 {
            return Err(Error::config(
                "synthetic batch size, keypoint count and heatmap size must be positive",
            ));
        }
        if self.img_size == 0 {
            return Err(Error::config("synthetic image size must be positive"));
        }
        if !(self.sigma > 0.0) || !(self.jitter >= 0.0) {
            return Err(Error::config(
                "synthetic sigma must be positive and jitter non-negative",
            ));
        }
        Ok(())
    }
}
