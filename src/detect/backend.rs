use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionCandidate;

/// Which leaf detector variant produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorVariant {
    Model,
    Fallback,
}

/// Leaf detector trait.
///
/// Implementations receive the full frame and return candidate regions in
/// discovery order. Errors are returned to the caller rather than panicking;
/// `LeafDetectionService` decides how a failure degrades.
pub trait LeafDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn variant(&self) -> DetectorVariant;

    /// Run detection on a frame. The frame must be treated as read-only.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
