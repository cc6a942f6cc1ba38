//! Click-to-region conversion for manual leaf selection.

use std::time::{Duration, Instant};

use crate::config::ClickSettings;
use crate::geometry::{clamp_and_validate, BoundingBox};

/// Turns a click into a fixed-size box centred on the click point.
///
/// Clicks arriving within `cooldown` of the previous attempt are dropped
/// without touching the timer. A click that passes the gate restarts the
/// cooldown even if its box is then rejected for being too small.
#[derive(Clone, Debug)]
pub struct ClickRegionSelector {
    region_size: u32,
    min_size: u32,
    cooldown: Duration,
    last_click: Option<Instant>,
}

impl ClickRegionSelector {
    pub fn new(settings: &ClickSettings) -> Self {
        Self {
            region_size: settings.region_size,
            min_size: settings.min_size,
            cooldown: settings.cooldown,
            last_click: None,
        }
    }

    pub fn create_region(
        &mut self,
        frame_w: u32,
        frame_h: u32,
        click_x: i64,
        click_y: i64,
        now: Instant,
    ) -> Option<BoundingBox> {
        if let Some(last) = self.last_click {
            if now.saturating_duration_since(last) < self.cooldown {
                return None;
            }
        }
        self.last_click = Some(now);

        let half = (self.region_size / 2) as i64;
        clamp_and_validate(
            click_x.saturating_sub(half),
            click_y.saturating_sub(half),
            click_x.saturating_add(half),
            click_y.saturating_add(half),
            frame_w,
            frame_h,
            self.min_size,
            self.min_size,
        )
        .ok()
    }

    /// Forget the last click, e.g. when a session ends.
    pub fn reset(&mut self) {
        self.last_click = None;
    }
}

impl Default for ClickRegionSelector {
    fn default() -> Self {
        Self::new(&ClickSettings::default())
    }
}
