//! Manual / Automatic operating mode.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Manual,
    Automatic,
}

impl OperatingMode {
    pub fn toggled(self) -> Self {
        match self {
            OperatingMode::Manual => OperatingMode::Automatic,
            OperatingMode::Automatic => OperatingMode::Manual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Manual => "manual",
            OperatingMode::Automatic => "automatic",
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the current mode. Transitions are unconditional; what each mode
/// permits is enforced by the video service.
#[derive(Clone, Debug, Default)]
pub struct ModeController {
    mode: OperatingMode,
}

impl ModeController {
    pub fn new(mode: OperatingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn is_automatic(&self) -> bool {
        self.mode == OperatingMode::Automatic
    }

    pub fn toggle(&mut self) -> OperatingMode {
        self.mode = self.mode.toggled();
        self.mode
    }
}
