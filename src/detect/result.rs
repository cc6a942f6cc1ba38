use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// A region proposed by a leaf detector, not yet classified.
///
/// `confidence` is a heuristic score in `[0, 1]`, not a calibrated probability.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl DetectionCandidate {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}
