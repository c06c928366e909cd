//! Error type shared by every module of the crate.
//!
//! Configuration problems are reported before any computation starts.
//! Numeric shape problems are reported at the point where they are detected
//! and propagated unchanged.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The evaluation loop was called without a backbone.
    #[error("base net is not specified")]
    MissingBackbone,

    /// The evaluation loop was called without any prediction head.
    #[error("prediction nets are all not specified")]
    MissingHeads,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// A backbone or head failed during its forward pass.
    #[error("network forward failed: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("recording error: {0}")]
    Recording(#[from] rerun::RecordingStreamError),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Error::Network(msg.into())
    }

    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
