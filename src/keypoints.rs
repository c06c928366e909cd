use ndarray::{Array2, Array3, ArrayView2, ArrayView4, Axis};

use crate::error::{Error, Result};

/// Row-major arg-max of one response map, first occurrence wins.
///
/// Returns `(row, col)`. NaN responses are skipped on purpose, so a map
/// with a stray NaN still yields its largest finite peak instead of the NaN
/// position; an all-NaN or empty map yields `(0, 0)`.
pub fn argmax_2d(map: &ArrayView2<f32>) -> (usize, usize) {
    let mut best = (0, 0);
    let mut best_v = f32::NEG_INFINITY;
    let mut seen = false;
    for ((r, c), &v) in map.indexed_iter() {
        if v.is_nan() {
            continue;
        }
        if !seen || v > best_v {
            best = (r, c);
            best_v = v;
            seen = true;
        }
    }
    best
}

/// Converts a heatmap batch `(N, C, H, W)` into pixel keypoints `(N, C, 2)`.
///
/// The peak of each channel is rescaled from heatmap grid units to an
/// `img_w x img_h` image and truncated to integer pixels. Maps without a
/// single cell (`H == 0` or `W == 0`) have no peak and are rejected.
pub fn get_keypoints(
    heatmaps: &ArrayView4<f32>,
    img_h: f64,
    img_w: f64,
) -> Result<Array3<f64>> {
    let (n, c, h, w) = heatmaps.dim();
    if h == 0 || w == 0 {
        return Err(Error::shape_mismatch(
            &[n, c, h.max(1), w.max(1)],
            heatmaps.shape(),
        ));
    }
    let mut kpts = Array3::<f64>::zeros((n, c, 2));
    for (i, heat_map) in heatmaps.axis_iter(Axis(0)).enumerate() {
        for (j, m) in heat_map.axis_iter(Axis(0)).enumerate() {
            let (row, col) = argmax_2d(&m);
            kpts[[i, j, 0]] = (col as f64 * img_w / w as f64).trunc();
            kpts[[i, j, 1]] = (row as f64 * img_h / h as f64).trunc();
        }
    }
    Ok(kpts)
}

/// Unnormalized 2D Gaussian of shape `(size_h, size_w)` centred at
/// `(center_x, center_y)` in grid units.
pub fn gaussian_kernel(
    size_w: usize,
    size_h: usize,
    center_x: f64,
    center_y: f64,
    sigma: f64,
) -> Array2<f32> {
    Array2::from_shape_fn((size_h, size_w), |(y, x)| {
        let d2 = (x as f64 - center_x).powi(2) + (y as f64 - center_y).powi(2);
        (-d2 / 2.0 / sigma / sigma).exp() as f32
    })
}
