pub mod config;
pub mod dataset;
pub mod discrepancy;
pub mod error;
pub mod evaluate;
pub mod io;
pub mod keypoints;
pub mod losses;
pub mod metrics;
pub mod network;
pub mod visualization;

pub use discrepancy::{Discrepancy, discrepancy};
pub use error::{Error, Result};
pub use evaluate::{EvalReport, evaluate};
pub use metrics::{pck, pck_curve_counts};
