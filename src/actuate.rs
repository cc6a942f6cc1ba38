//! Sprayer actuation.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::SprayerSettings;

pub trait Actuator: Send {
    fn name(&self) -> &'static str;

    /// Hold the sprayer open for `duration_ms`. Zero is a no-op.
    fn activate(&mut self, duration_ms: u32) -> Result<()>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn activate(&mut self, duration_ms: u32) -> Result<()> {
        (**self).activate(duration_ms)
    }
}

/// Stand-in used off-device: waits out the spray duration without touching
/// hardware.
#[derive(Debug, Default)]
pub struct SimulatedSprayer {
    activations: u64,
}

impl SimulatedSprayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }
}

impl Actuator for SimulatedSprayer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn activate(&mut self, duration_ms: u32) -> Result<()> {
        if duration_ms == 0 {
            return Ok(());
        }
        log::info!("sprayer (simulated): on for {} ms", duration_ms);
        std::thread::sleep(Duration::from_millis(duration_ms as u64));
        self.activations += 1;
        Ok(())
    }
}

/// Sprayer valve on a GPIO line driven through `/sys/class/gpio`.
pub struct SysfsGpioSprayer {
    pin: u32,
    value_path: PathBuf,
}

impl SysfsGpioSprayer {
    const SYSFS_ROOT: &'static str = "/sys/class/gpio";

    pub fn open(pin: u32) -> Result<Self> {
        Self::open_at(PathBuf::from(Self::SYSFS_ROOT), pin)
    }

    fn open_at(root: PathBuf, pin: u32) -> Result<Self> {
        let line_dir = root.join(format!("gpio{}", pin));
        if !line_dir.exists() {
            std::fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("export gpio {}", pin))?;
        }
        std::fs::write(line_dir.join("direction"), "out")
            .with_context(|| format!("set gpio {} direction", pin))?;
        let sprayer = Self {
            pin,
            value_path: line_dir.join("value"),
        };
        sprayer.write_level(false)?;
        Ok(sprayer)
    }

    fn write_level(&self, high: bool) -> Result<()> {
        std::fs::write(&self.value_path, if high { "1" } else { "0" })
            .with_context(|| format!("write gpio {} value", self.pin))
    }
}

impl Actuator for SysfsGpioSprayer {
    fn name(&self) -> &'static str {
        "sysfs-gpio"
    }

    fn activate(&mut self, duration_ms: u32) -> Result<()> {
        if duration_ms == 0 {
            return Ok(());
        }
        log::info!("sprayer gpio{}: on for {} ms", self.pin, duration_ms);
        self.write_level(true)?;
        std::thread::sleep(Duration::from_millis(duration_ms as u64));
        self.write_level(false)
    }
}

impl Drop for SysfsGpioSprayer {
    fn drop(&mut self) {
        let _ = self.write_level(false);
    }
}

/// Pick the sprayer implied by configuration, degrading to the simulator
/// when the GPIO line cannot be claimed.
pub fn sprayer_from_settings(settings: &SprayerSettings) -> Box<dyn Actuator> {
    match (settings.gpio_pin, settings.simulate) {
        (Some(pin), false) => match SysfsGpioSprayer::open(pin) {
            Ok(sprayer) => {
                log::info!("sprayer: gpio{} ready", pin);
                Box::new(sprayer)
            }
            Err(e) => {
                log::warn!("sprayer: gpio{} unavailable ({:#}); simulating", pin, e);
                Box::new(SimulatedSprayer::new())
            }
        },
        _ => {
            log::info!("sprayer: simulated");
            Box::new(SimulatedSprayer::new())
        }
    }
}
