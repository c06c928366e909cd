//! Disagreement of two prediction heads across source and target domains.

use ndarray::{ArrayD, Axis, concatenate};

use crate::error::Result;
use crate::losses::Criterion;
use crate::network::Network;

#[derive(Debug, Clone)]
pub struct Discrepancy {
    /// Source features followed by target features along the batch axis.
    /// Owned, so nothing computed from it reaches back into the backbone.
    pub union_features: ArrayD<f32>,
    /// `|source - target|`.
    pub loss: f32,
    /// Head disagreement on the source batch.
    pub source: f32,
    /// Head disagreement on the target batch.
    pub target: f32,
}

/// Runs the shared backbone on both domains and compares the two heads.
///
/// The two batches may differ in size but must agree on every other axis
/// once passed through `base_net`.
pub fn discrepancy(
    source_data: &ArrayD<f32>,
    target_data: &ArrayD<f32>,
    base_net: &dyn Network,
    h1: &dyn Network,
    h2: &dyn Network,
    criterion: &dyn Criterion,
) -> Result<Discrepancy> {
    let source_feat = base_net.forward(source_data)?;
    let target_feat = base_net.forward(target_data)?;
    let union_features = concatenate(Axis(0), &[source_feat.view(), target_feat.view()])?;

    let src_h1 = h1.forward(&source_feat)?;
    let src_h2 = h2.forward(&source_feat)?;

    let tgt_h1 = h1.forward(&target_feat)?;
    let tgt_h2 = h2.forward(&target_feat)?;

    let source = criterion.loss(&src_h1, &src_h2)?;
    let target = criterion.loss(&tgt_h1, &tgt_h2)?;
    log::trace!("discrepancy src={:.6} tgt={:.6}", source, target);
    Ok(Discrepancy {
        union_features,
        loss: (source - target).abs(),
        source,
        target,
    })
}
