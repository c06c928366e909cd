use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{ArrayView2, ArrayView3};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rerun::{RecordingStream, TimeCell};
use std::io::Cursor;

use crate::error::{Error, Result};

/// Receives named artifacts for external recording.
pub trait ArtifactSink {
    fn log_image(&mut self, name: &str, img: &RgbImage) -> Result<()>;
    /// `points` are `(threshold, value)` pairs in sweep order.
    fn log_curve(&mut self, name: &str, points: &[(f64, f64)]) -> Result<()>;
}

/// Forwards artifacts to a rerun recording.
pub struct RerunSink {
    recording: RecordingStream,
}

impl RerunSink {
    pub fn new(recording: RecordingStream) -> RerunSink {
        RerunSink { recording }
    }

    pub fn save(application_id: &str, path: &str) -> Result<RerunSink> {
        let recording = rerun::RecordingStreamBuilder::new(application_id).save(path)?;
        Ok(RerunSink { recording })
    }

    pub fn recording(&self) -> &RecordingStream {
        &self.recording
    }
}

impl ArtifactSink for RerunSink {
    fn log_image(&mut self, name: &str, img: &RgbImage) -> Result<()> {
        log_image_as_compressed(&self.recording, name, img, ImageFormat::Png)
    }

    fn log_curve(&mut self, name: &str, points: &[(f64, f64)]) -> Result<()> {
        for (idx, (alpha, value)) in points.iter().enumerate() {
            self.recording
                .set_time("pck_threshold", TimeCell::from_sequence(idx as i64));
            self.recording
                .log(format!("{}/pck", name), &rerun::Scalars::new([*value]))?;
            log::trace!("{} alpha={:.3} pck={:.4}", name, alpha, value);
        }
        self.recording.reset_time();
        Ok(())
    }
}

/// Keeps every artifact in memory, in logging order.
#[derive(Default)]
pub struct MemorySink {
    pub images: Vec<(String, RgbImage)>,
    pub curves: Vec<(String, Vec<(f64, f64)>)>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn image_names(&self) -> Vec<&str> {
        self.images.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl ArtifactSink for MemorySink {
    fn log_image(&mut self, name: &str, img: &RgbImage) -> Result<()> {
        self.images.push((name.to_string(), img.clone()));
        Ok(())
    }

    fn log_curve(&mut self, name: &str, points: &[(f64, f64)]) -> Result<()> {
        self.curves.push((name.to_string(), points.to_vec()));
        Ok(())
    }
}

pub fn log_image_as_compressed(
    recording: &RecordingStream,
    topic: &str,
    img: &RgbImage,
    format: ImageFormat,
) -> Result<()> {
    let mut bytes: Vec<u8> = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), format)?;
    recording.log(
        format!("{}/image", topic),
        &rerun::EncodedImage::from_file_contents(bytes),
    )?;
    Ok(())
}

pub fn id_to_color(id: usize) -> (u8, u8, u8, u8) {
    let mut rng = ChaCha8Rng::seed_from_u64(id as u64);
    let color_num = rng.random_range(0..2u32.pow(24));
    (
        ((color_num >> 16) % 256) as u8,
        ((color_num >> 8) % 256) as u8,
        (color_num % 256) as u8,
        255,
    )
}

/// Recovers a displayable image from one normalized `(C, H, W)` input.
///
/// Each channel is mapped back with `v * std + mean` and is expected to land
/// in `[0, 1]`. Three channels give an RGB image, any other count a gray
/// image of the channel mean.
pub fn denormalize(input: &ArrayView3<f32>, mean: &[f32], std: &[f32]) -> Result<RgbImage> {
    let (c, h, w) = input.dim();
    if mean.len() != c || std.len() != c {
        return Err(Error::shape_mismatch(&[c], &[mean.len().min(std.len())]));
    }
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let value = |ch: usize, y: usize, x: usize| input[[ch, y, x]] * std[ch] + mean[ch];
    let img = RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if c == 3 {
            Rgb([
                to_u8(value(0, y, x)),
                to_u8(value(1, y, x)),
                to_u8(value(2, y, x)),
            ])
        } else {
            let g = (0..c).map(|ch| value(ch, y, x)).sum::<f32>() / c.max(1) as f32;
            let g = to_u8(g);
            Rgb([g, g, g])
        }
    });
    Ok(img)
}

/// Draws each `(x, y)` row of `points` as a filled disc colored by its index.
pub fn draw_keypoints(img: &mut RgbImage, points: &ArrayView2<f64>, radius: u32) {
    let r = radius as i64;
    let (w, h) = (img.width() as i64, img.height() as i64);
    for (id, p) in points.outer_iter().enumerate() {
        let (cx, cy) = (p[0].round() as i64, p[1].round() as i64);
        let (cr, cg, cb, _) = id_to_color(id);
        for dy in -r..=r {
            for dx in -r..=r {
                let (x, y) = (cx + dx, cy + dy);
                if dx * dx + dy * dy <= r * r && x >= 0 && y >= 0 && x < w && y < h {
                    img.put_pixel(x as u32, y as u32, Rgb([cr, cg, cb]));
                }
            }
        }
    }
}

/// Renders `points` on a copy of `img` and forwards it to `sink` as `name`.
pub fn vis_keypoints(
    sink: &mut dyn ArtifactSink,
    name: &str,
    img: &RgbImage,
    points: &ArrayView2<f64>,
    radius: u32,
) -> Result<()> {
    let mut canvas = img.clone();
    draw_keypoints(&mut canvas, points, radius);
    sink.log_image(name, &canvas)
}
