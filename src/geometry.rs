//! Bounding-box math shared by the click selector and the detectors.
//!
//! Boxes are integer pixel rectangles `[x1, x2) x [y1, y2)` whose corners are
//! clamped into the frame. A box that ends up smaller than the caller's
//! minimum is rejected outright; it is never grown back into validity.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Minimum width/height of a user-selected region.
pub const MANUAL_MIN_SIZE: u32 = 100;

/// Minimum width/height of a detector-proposed region.
pub const DETECTED_MIN_SIZE: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// True when the box lies fully inside a `frame_w x frame_h` frame.
    pub fn fits_within(&self, frame_w: u32, frame_h: u32) -> bool {
        self.x2 <= frame_w && self.y2 <= frame_h
    }
}

/// Outcome of a box that was too small after clamping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rejected {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "region {}x{} is below the {}x{} minimum",
            self.width, self.height, self.min_width, self.min_height
        )
    }
}

impl std::error::Error for Rejected {}

/// Clamp raw corner coordinates into the frame and enforce a minimum size.
///
/// Coordinates are signed so callers can pass `click - half_size` without
/// pre-clamping. A zero-area result is always rejected, even with zero minimums.
#[allow(clippy::too_many_arguments)]
pub fn clamp_and_validate(
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
    frame_w: u32,
    frame_h: u32,
    min_w: u32,
    min_h: u32,
) -> Result<BoundingBox, Rejected> {
    let cx1 = clamp_axis(x1, frame_w);
    let cy1 = clamp_axis(y1, frame_h);
    let cx2 = clamp_axis(x2, frame_w);
    let cy2 = clamp_axis(y2, frame_h);

    let width = cx2.saturating_sub(cx1);
    let height = cy2.saturating_sub(cy1);

    if width == 0 || height == 0 || width < min_w || height < min_h {
        return Err(Rejected {
            width,
            height,
            min_width: min_w,
            min_height: min_h,
        });
    }

    Ok(BoundingBox {
        x1: cx1,
        y1: cy1,
        x2: cx2,
        y2: cy2,
    })
}

fn clamp_axis(value: i64, limit: u32) -> u32 {
    value.clamp(0, limit as i64) as u32
}

/// Copy the pixels under `bbox` out of `frame`. The source is left untouched.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    imageops::crop_imm(frame, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image()
}

/// Resize a crop to the square input the classifier expects.
pub fn resize_square(image: &RgbImage, size: u32) -> RgbImage {
    imageops::resize(image, size, size, FilterType::Triangle)
}
