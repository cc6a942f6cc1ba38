//! Leafguard
//!
//! Watches a camera feed for plant leaves, has each leaf classified for
//! disease severity, and drives a sprayer from the result.
//!
//! # Architecture
//!
//! Two region sources feed one downstream pipeline:
//!
//! - **Manual**: an operator clicks on the frame; `ClickRegionSelector` turns
//!   the click into a fixed-size box which is appended to the session's
//!   `SelectedRegions`. Classifying a region returns the classifier's answer
//!   and nothing else.
//! - **Automatic**: every scheduled tick the `LeafDetectionService` proposes
//!   leaf boxes (trained model when available, colour/contour fallback
//!   otherwise). Each batch is handed to a background `BatchWorker` which
//!   classifies, records and sprays per leaf.
//!
//! `OperatingMode` decides which source is live. `VideoService` owns the
//! capture session, the shared state, and the command surface.
//!
//! # Module Structure
//!
//! - `geometry`, `select`, `regions`: bounding boxes and manual selection
//! - `detect`, `schedule`: leaf detectors and the detection gate
//! - `classify`, `policy`, `pipeline`, `worker`: classify → decide → act
//! - `storage`, `actuate`: capture/detection/action log and the sprayer
//! - `ingest`, `frame`: frame sources
//! - `service`, `command`, `mode`, `config`: the running service

use std::sync::{Mutex, MutexGuard};

pub mod actuate;
pub mod classify;
pub mod command;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod mode;
pub mod pipeline;
pub mod policy;
pub mod regions;
pub mod schedule;
pub mod select;
pub mod service;
pub mod storage;
pub mod worker;

pub use actuate::{sprayer_from_settings, Actuator, SimulatedSprayer, SysfsGpioSprayer};
pub use classify::{ClassificationResult, Classifier, ClassifyError, HttpClassifier};
pub use command::{Command, CommandError};
pub use config::LeafguardConfig;
pub use detect::{
    DetectionCandidate, DetectorInitError, DetectorVariant, LeafDetectionService, LeafDetector,
};
pub use frame::Frame;
pub use geometry::{clamp_and_validate, BoundingBox, Rejected};
pub use ingest::{open_source, FrameSource};
pub use mode::{ModeController, OperatingMode};
pub use pipeline::{CandidateOutcome, DetectionPipeline, TreatmentReport};
pub use policy::{decide, ActionDecision, SprayAction, SprayPolicy};
pub use regions::{RegionHandle, SelectedRegions};
pub use schedule::DetectionScheduler;
pub use select::ClickRegionSelector;
pub use service::{ServiceStatus, TickOutcome, VideoService};
pub use storage::{
    CropArchive, DetectionStore, InMemoryDetectionStore, RecentActivity, SqliteDetectionStore,
};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its state consistent between
/// statements, so a poisoned lock still guards valid data.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
