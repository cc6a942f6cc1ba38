//! Severity-to-spray decision.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprayAction {
    None,
    SprayShort,
    SprayLong,
}

impl SprayAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SprayAction::None => "none",
            SprayAction::SprayShort => "spray_short",
            SprayAction::SprayLong => "spray_long",
        }
    }
}

impl std::fmt::Display for SprayAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: SprayAction,
    pub duration_ms: u32,
}

impl ActionDecision {
    pub const NONE: ActionDecision = ActionDecision {
        action: SprayAction::None,
        duration_ms: 0,
    };

    pub fn actuates(&self) -> bool {
        self.duration_ms > 0
    }
}

/// Map a severity score onto a spray action.
///
/// Thresholds are half-open on the low side: a severity equal to a threshold
/// takes the higher action. Non-finite severities never spray.
pub fn decide(
    severity: f32,
    low_threshold: f32,
    high_threshold: f32,
    low_duration_ms: u32,
    high_duration_ms: u32,
) -> ActionDecision {
    if !severity.is_finite() || severity < low_threshold {
        ActionDecision::NONE
    } else if severity < high_threshold {
        ActionDecision {
            action: SprayAction::SprayShort,
            duration_ms: low_duration_ms,
        }
    } else {
        ActionDecision {
            action: SprayAction::SprayLong,
            duration_ms: high_duration_ms,
        }
    }
}

/// Configured thresholds and spray durations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprayPolicy {
    pub low_threshold: f32,
    pub high_threshold: f32,
    pub low_duration_ms: u32,
    pub high_duration_ms: u32,
}

impl Default for SprayPolicy {
    fn default() -> Self {
        Self {
            low_threshold: 30.0,
            high_threshold: 70.0,
            low_duration_ms: 1_000,
            high_duration_ms: 3_000,
        }
    }
}

impl SprayPolicy {
    pub fn decide(&self, severity: f32) -> ActionDecision {
        decide(
            severity,
            self.low_threshold,
            self.high_threshold,
            self.low_duration_ms,
            self.high_duration_ms,
        )
    }
}
