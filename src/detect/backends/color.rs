use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::point::Point;

use crate::detect::backend::{DetectorVariant, LeafDetector};
use crate::detect::result::DetectionCandidate;
use crate::geometry::BoundingBox;

/// Tuning for the color/contour detector.
///
/// Hue uses the 0..180 scale, saturation and value 0..255.
#[derive(Clone, Debug)]
pub struct ColorContourConfig {
    pub hue_min: u8,
    pub hue_max: u8,
    pub saturation_min: u8,
    pub value_min: u8,
    /// Radius of the square structuring element (2 -> 5x5).
    pub kernel_radius: u8,
    /// Contours must enclose strictly more than this many square pixels.
    pub min_contour_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub confidence_cap: f32,
    /// Area that maps to confidence 1.0 before capping.
    pub confidence_area_scale: f64,
}

impl Default for ColorContourConfig {
    fn default() -> Self {
        Self {
            hue_min: 35,
            hue_max: 85,
            saturation_min: 50,
            value_min: 50,
            kernel_radius: 2,
            min_contour_area: 1000.0,
            min_aspect_ratio: 0.3,
            max_aspect_ratio: 3.0,
            confidence_cap: 0.8,
            confidence_area_scale: 10_000.0,
        }
    }
}

/// Fallback leaf detector: green hue band -> closed/opened mask -> outer
/// contours -> bounding rectangles.
///
/// Needs no model assets, so it is always available.
#[derive(Default)]
pub struct ColorContourBackend {
    config: ColorContourConfig,
}

impl ColorContourBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binary mask of pixels inside the green HSV band.
    pub fn green_mask(&self, frame: &RgbImage) -> GrayImage {
        let cfg = &self.config;
        let mut mask = GrayImage::new(frame.width(), frame.height());
        for (x, y, pixel) in frame.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let inside = (cfg.hue_min..=cfg.hue_max).contains(&h)
                && s >= cfg.saturation_min
                && v >= cfg.value_min;
            if inside {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }
}

impl LeafDetector for ColorContourBackend {
    fn name(&self) -> &'static str {
        "color-contour"
    }

    fn variant(&self) -> DetectorVariant {
        DetectorVariant::Fallback
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        let cfg = &self.config;
        let mask = self.green_mask(frame);
        let mask = close(&mask, Norm::LInf, cfg.kernel_radius);
        let mask = open(&mask, Norm::LInf, cfg.kernel_radius);

        let mut leaves = Vec::new();
        for contour in find_contours::<i32>(&mask) {
            if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                continue;
            }
            let area = polygon_area(&contour.points);
            if area <= cfg.min_contour_area {
                continue;
            }
            let Some(bbox) = bounding_rect(&contour.points) else {
                continue;
            };
            let aspect = bbox.width() as f64 / bbox.height() as f64;
            if aspect < cfg.min_aspect_ratio || aspect > cfg.max_aspect_ratio {
                continue;
            }
            let confidence = ((area / cfg.confidence_area_scale) as f32).min(cfg.confidence_cap);
            leaves.push(DetectionCandidate::new(bbox, confidence));
        }
        Ok(leaves)
    }
}

/// 8-bit RGB to HSV with hue halved into 0..180.
pub(crate) fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let saturation = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    (
        (hue / 2.0).round().min(180.0) as u8,
        saturation.round() as u8,
        max as u8,
    )
}

/// Shoelace area of a closed boundary polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

/// Axis-aligned rectangle covering every boundary pixel.
fn bounding_rect(points: &[Point<i32>]) -> Option<BoundingBox> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    if min_x < 0 || min_y < 0 {
        return None;
    }
    Some(BoundingBox {
        x1: min_x as u32,
        y1: min_y as u32,
        x2: max_x as u32 + 1,
        y2: max_y as u32 + 1,
    })
}
