use std::io::Write;

use ndarray::Array3;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};
use crate::evaluate::EvalReport;

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize>(output_path: &str, object: &T) -> Result<()> {
    let j = serde_json::to_string_pretty(object)?;
    let mut file = std::fs::File::create(output_path)?;
    file.write_all(j.as_bytes())?;
    Ok(())
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let contents = std::fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[derive(Serialize)]
struct PckReportFile<'a> {
    timestamp: String,
    domain: &'a str,
    status: &'a str,
    #[serde(flatten)]
    report: &'a EvalReport,
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&Rfc3339).unwrap_or_default()
}

/// Writes an evaluation report as JSON, stamped with the local time.
pub fn write_report(
    output_path: &str,
    domain: &str,
    status: &str,
    report: &EvalReport,
) -> Result<()> {
    let file = PckReportFile {
        timestamp: now_rfc3339(),
        domain,
        status,
        report,
    };
    object_to_json(output_path, &file)
}

/// Plain text PCK table, one threshold per line.
pub fn format_curve(report: &EvalReport) -> String {
    let mut s = String::new();
    s += format!("{}\n", report.summary()).as_str();
    for (alpha, value) in report.curve.points() {
        s += format!("    alpha {:.3}: {:.5}\n", alpha, value).as_str();
    }
    s
}

/// Predicted and ground-truth keypoints of one batch, as stored on disk.
///
/// Both sets are nested `[image][keypoint][coordinate]` lists with `(x, y)`
/// first; extra coordinates such as visibility are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypointFile {
    pub img_side_len: f64,
    pub predicted: Vec<Vec<Vec<f64>>>,
    pub ground_truth: Vec<Vec<Vec<f64>>>,
}

impl KeypointFile {
    pub fn predicted_array(&self) -> Result<Array3<f64>> {
        nested_to_array3(&self.predicted)
    }

    pub fn ground_truth_array(&self) -> Result<Array3<f64>> {
        nested_to_array3(&self.ground_truth)
    }
}

/// Packs a rectangular nested list into an `(N, K, D)` array.
pub fn nested_to_array3(nested: &[Vec<Vec<f64>>]) -> Result<Array3<f64>> {
    let n = nested.len();
    let k = nested.first().map_or(0, |img| img.len());
    let d = nested
        .first()
        .and_then(|img| img.first())
        .map_or(0, |p| p.len());
    let mut data = Vec::with_capacity(n * k * d);
    for img in nested {
        if img.len() != k {
            return Err(Error::shape_mismatch(&[n, k, d], &[n, img.len(), d]));
        }
        for p in img {
            if p.len() != d {
                return Err(Error::shape_mismatch(&[n, k, d], &[n, k, p.len()]));
            }
            data.extend_from_slice(p);
        }
    }
    Ok(Array3::from_shape_vec((n, k, d), data)?)
}
