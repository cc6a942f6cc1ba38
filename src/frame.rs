//! Captured frames.
//!
//! A `Frame` is an immutable RGB image plus its sequence number. Pixels sit behind
//! an `Arc` so the frame loop, the command surface and the background
//! classification worker can all hold the same frame without copying it.

use image::RgbImage;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            seq,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Monotonic sequence number assigned by the source.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}
