//! Command surface adapter.
//!
//! Commands arrive as JSON objects tagged by `"command"`, e.g.
//! `{"command": "click", "x": 320, "y": 240}`, and map one-to-one onto
//! `VideoService` operations.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::classify::ClassifyError;
use crate::pipeline::PipelineError;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    StartSession {
        #[serde(default)]
        source: Option<String>,
    },
    StopSession,
    ToggleMode,
    Click {
        #[serde(default)]
        x: Option<i64>,
        #[serde(default)]
        y: Option<i64>,
    },
    ClassifyRegion {
        #[serde(default)]
        region_index: usize,
    },
    AutomaticDetections,
    Capture,
    Recent {
        #[serde(default)]
        limit: Option<usize>,
    },
    Status,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        serde_json::from_str(line).map_err(|e| CommandError::Malformed(e.to_string()))
    }
}

/// Rejection or failure of a command. Nothing here is fatal to the service.
#[derive(Debug)]
pub enum CommandError {
    /// Manual region operations while in Automatic mode.
    ModeDisabled,
    /// Automatic results requested while in Manual mode.
    AutomaticModeDisabled,
    MissingCoordinates,
    InvalidRegionIndex(usize),
    /// The region list was cleared after the index was taken.
    StaleRegion,
    /// Click fell inside the cooldown or produced a box below the minimum.
    RegionRejected,
    NoFrame,
    NotRunning,
    Malformed(String),
    Classification(ClassifyError),
    Processing(String),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::ModeDisabled => "mode_disabled",
            CommandError::AutomaticModeDisabled => "automatic_mode_disabled",
            CommandError::MissingCoordinates => "missing_coordinates",
            CommandError::InvalidRegionIndex(_) => "invalid_region_index",
            CommandError::StaleRegion => "stale_region",
            CommandError::RegionRejected => "region_rejected",
            CommandError::NoFrame => "no_frame",
            CommandError::NotRunning => "not_running",
            CommandError::Malformed(_) => "malformed",
            CommandError::Classification(_) => "classification_failed",
            CommandError::Processing(_) => "processing_failed",
        }
    }

    /// Error body returned to the caller.
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string(), "kind": self.kind() })
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::ModeDisabled => write!(f, "manual detection disabled in automatic mode"),
            CommandError::AutomaticModeDisabled => {
                write!(f, "automatic detections are only available in automatic mode")
            }
            CommandError::MissingCoordinates => write!(f, "missing click coordinates"),
            CommandError::InvalidRegionIndex(index) => write!(f, "invalid region index {}", index),
            CommandError::StaleRegion => write!(f, "region list changed; select the region again"),
            CommandError::RegionRejected => {
                write!(f, "click ignored: too soon after the last one or region too small")
            }
            CommandError::NoFrame => write!(f, "no frame available"),
            CommandError::NotRunning => write!(f, "capture session is not running"),
            CommandError::Malformed(msg) => write!(f, "malformed command: {}", msg),
            CommandError::Classification(e) => write!(f, "detection failed: {}", e),
            CommandError::Processing(msg) => write!(f, "processing failed: {}", msg),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ClassifyError> for CommandError {
    fn from(e: ClassifyError) -> Self {
        CommandError::Classification(e)
    }
}

impl From<PipelineError> for CommandError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Classify(e) => CommandError::Classification(e),
            PipelineError::Store(msg) => CommandError::Processing(msg),
        }
    }
}
