use anyhow::Result;
use image::{Rgb, RgbImage};

use super::FrameSource;
use crate::frame::Frame;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// A leaf drifting across the synthetic scene.
struct Leaf {
    cx: i64,
    cy: i64,
    rx: i64,
    ry: i64,
    /// Horizontal drift in pixels per frame.
    dx: i64,
    color: Rgb<u8>,
}

const LEAVES: [Leaf; 3] = [
    Leaf {
        cx: 140,
        cy: 150,
        rx: 60,
        ry: 40,
        dx: 2,
        color: Rgb([46, 139, 60]),
    },
    Leaf {
        cx: 420,
        cy: 300,
        rx: 45,
        ry: 55,
        dx: 1,
        color: Rgb([90, 170, 50]),
    },
    Leaf {
        cx: 300,
        cy: 400,
        rx: 35,
        ry: 25,
        dx: 3,
        color: Rgb([30, 110, 45]),
    },
];

/// Synthetic garden scene for `stub://` URLs: textured soil with a few
/// green leaves drifting left to right. Always opens successfully.
pub struct SyntheticGardenSource {
    url: String,
    frame_count: u64,
    open: bool,
}

impl SyntheticGardenSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            frame_count: 0,
            open: false,
        }
    }

    fn render(&self) -> RgbImage {
        let t = self.frame_count as i64;
        let span = WIDTH as i64 + 120;
        let leaves: Vec<(i64, &Leaf)> = LEAVES
            .iter()
            .map(|leaf| ((leaf.cx + leaf.dx * t).rem_euclid(span) - 60, leaf))
            .collect();

        RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let (x, y) = (x as i64, y as i64);
            for (cx, leaf) in &leaves {
                let nx = (x - cx) as f32 / leaf.rx as f32;
                let ny = (y - leaf.cy) as f32 / leaf.ry as f32;
                if nx * nx + ny * ny <= 1.0 {
                    return leaf.color;
                }
            }
            let grain = ((x * 7 + y * 13) % 11) as u8;
            Rgb([62 + grain, 46 + grain / 2, 30])
        })
    }
}

impl FrameSource for SyntheticGardenSource {
    fn open(&mut self) -> Result<()> {
        log::info!("source {}: synthetic garden {}x{}", self.url, WIDTH, HEIGHT);
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Ok(None);
        }
        self.frame_count += 1;
        Ok(Some(Frame::new(self.render(), self.frame_count)))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn describe(&self) -> String {
        format!("{} (synthetic)", self.url)
    }
}
