//! Antimeridian handling.
//!
//! Features that reach past x = 0 or x = 1 (longitude ±180) are cut into three world
//! copies. The parts hanging into the left and right neighbouring worlds are shifted
//! back by one world width so they render in the edge tile columns.

use std::borrow::Cow;
use std::sync::Arc;

use crate::clip::{clip, Axis};
use crate::feature::Feature;
use crate::index::TilerOptions;

/// Wrap features around the antimeridian.
///
/// Returns the input untouched when no feature reaches into a neighbouring world.
/// Otherwise the result is the left copy (shifted by +1), the center copy, then the
/// right copy (shifted by -1).
pub fn wrap(features: Vec<Arc<Feature>>, options: &TilerOptions) -> Vec<Arc<Feature>> {
    let buffer = options.buffer / options.extent as f64;
    let line_metrics = options.line_metrics;

    // min/max of -1/2 disable the whole-list fast paths
    let band = |k1: f64, k2: f64| {
        clip(&features, 1.0, k1, k2, Axis::X, -1.0, 2.0, line_metrics).map(Cow::into_owned)
    };

    let left = band(-1.0 - buffer, buffer);
    let right = band(1.0 - buffer, 2.0 + buffer);

    if left.is_none() && right.is_none() {
        return features;
    }

    let center = band(-buffer, 1.0 + buffer).unwrap_or_default();
    log::trace!(
        "wrapped {} features: {} left, {} right",
        features.len(),
        left.as_ref().map_or(0, Vec::len),
        right.as_ref().map_or(0, Vec::len)
    );

    let mut merged = Vec::with_capacity(center.len());
    if let Some(left) = left {
        merged.extend(shift_features(&left, 1.0));
    }
    merged.extend(center);
    if let Some(right) = right {
        merged.extend(shift_features(&right, -1.0));
    }
    merged
}

fn shift_features(features: &[Arc<Feature>], offset: f64) -> impl Iterator<Item = Arc<Feature>> + '_ {
    features.iter().map(move |f| Arc::new(f.shifted(offset)))
}
