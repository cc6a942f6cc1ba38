//! The video service: one capture session, one frame loop, one command
//! surface.
//!
//! State shared between the frame loop and commands lives behind a single
//! mutex and is only ever changed as a whole (a stop clears the frame, the
//! regions and the detections in one critical section). Blocking work
//! (frame reads, model inference, classification) runs outside that lock.
//! Every session gets a new epoch; a frame read or batch that finishes after
//! its session ended is discarded.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::classify::ClassificationResult;
use crate::command::{Command, CommandError};
use crate::config::{ClickSettings, LeafguardConfig, SourceSettings};
use crate::detect::{DetectionCandidate, DetectorVariant, LeafDetectionService};
use crate::frame::Frame;
use crate::geometry::BoundingBox;
use crate::ingest::{open_source, FrameSource};
use crate::lock;
use crate::mode::{ModeController, OperatingMode};
use crate::pipeline::{CandidateOutcome, DetectionPipeline, TreatmentReport};
use crate::regions::{RegionHandle, Resolve, SelectedRegions};
use crate::schedule::{DetectionScheduler, AUTO_DETECTION_INTERVAL};
use crate::select::ClickRegionSelector;
use crate::worker::{BatchJob, BatchReport, BatchWorker, Submit};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_RECENT_LIMIT: usize = 20;

/// What a single frame-loop tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    NotRunning,
    FrameUnavailable,
    /// The session stopped while the frame was being read.
    Discarded,
    /// Frame stored; no detection due (or Manual mode).
    Idle,
    NoLeaves,
    Dispatched(usize),
    /// Detection was due but the previous batch is still in flight.
    SkippedBusy,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegionSelection {
    pub handle: RegionHandle,
    pub region: BoundingBox,
    pub region_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub mode: OperatingMode,
    pub source: Option<String>,
    pub frames_read: u64,
    pub has_frame: bool,
    pub regions: Vec<BoundingBox>,
    pub region_generation: u64,
    pub current_detections: usize,
    pub detector: &'static str,
    pub detector_variant: DetectorVariant,
    pub batch_in_flight: bool,
    pub batches_dispatched: u64,
    pub batches_skipped: u64,
}

struct SessionState {
    running: bool,
    session: u64,
    source_name: Option<String>,
    frame: Option<Frame>,
    regions: SelectedRegions,
    mode: ModeController,
    selector: ClickRegionSelector,
    scheduler: DetectionScheduler,
    current_detections: Vec<DetectionCandidate>,
    last_results: Vec<CandidateOutcome>,
    frames_read: u64,
    batches_dispatched: u64,
    batches_skipped: u64,
}

pub struct VideoService {
    state: Mutex<SessionState>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    detector: Mutex<LeafDetectionService>,
    pipeline: Arc<DetectionPipeline>,
    worker: BatchWorker,
    reports: Mutex<Receiver<BatchReport>>,
    default_source: String,
}

impl VideoService {
    pub fn new(
        detector: LeafDetectionService,
        pipeline: DetectionPipeline,
        click: &ClickSettings,
        auto_interval: Duration,
    ) -> Result<Self> {
        let pipeline = Arc::new(pipeline);
        let (reports_tx, reports_rx) = mpsc::channel();
        let worker = BatchWorker::spawn(pipeline.clone(), reports_tx)?;
        Ok(Self {
            state: Mutex::new(SessionState {
                running: false,
                session: 0,
                source_name: None,
                frame: None,
                regions: SelectedRegions::new(),
                mode: ModeController::default(),
                selector: ClickRegionSelector::new(click),
                scheduler: DetectionScheduler::new(auto_interval),
                current_detections: Vec::new(),
                last_results: Vec::new(),
                frames_read: 0,
                batches_dispatched: 0,
                batches_skipped: 0,
            }),
            source: Mutex::new(None),
            detector: Mutex::new(detector),
            pipeline,
            worker,
            reports: Mutex::new(reports_rx),
            default_source: SourceSettings::default().url,
        })
    }

    pub fn from_config(
        config: &LeafguardConfig,
        detector: LeafDetectionService,
        pipeline: DetectionPipeline,
    ) -> Result<Self> {
        let mut service = Self::new(
            detector,
            pipeline,
            &config.click,
            config.schedule.auto_interval,
        )?;
        service.default_source = config.source.url.clone();
        Ok(service)
    }

    /// Construct a service with the automatic interval used by the video loop.
    pub fn with_defaults(detector: LeafDetectionService, pipeline: DetectionPipeline) -> Result<Self> {
        Self::new(
            detector,
            pipeline,
            &ClickSettings::default(),
            AUTO_DETECTION_INTERVAL,
        )
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Open `source` and start a new session. A source that fails to open
    /// leaves the service stopped.
    pub fn start(&self, mut source: Box<dyn FrameSource>) -> bool {
        self.stop();
        let name = source.describe();
        if let Err(e) = source.open() {
            log::error!("failed to start capture from {}: {:#}", name, e);
            source.close();
            return false;
        }
        *lock(&self.source) = Some(source);

        let mut state = lock(&self.state);
        state.running = true;
        state.session += 1;
        state.source_name = Some(name.clone());
        state.frames_read = 0;
        state.scheduler.reset();
        log::info!("capture session {} started: {}", state.session, name);
        true
    }

    pub fn start_url(&self, url: &str) -> bool {
        match open_source(url) {
            Ok(source) => self.start(source),
            Err(e) => {
                log::error!("failed to start capture from {}: {:#}", url, e);
                false
            }
        }
    }

    /// End the session: regions, frame and detections are cleared together,
    /// any in-flight batch is cancelled, then the source is released. Safe to
    /// call when already stopped.
    pub fn stop(&self) {
        let was_running = {
            let mut state = lock(&self.state);
            let was_running = state.running;
            state.running = false;
            state.session += 1;
            state.frame = None;
            state.regions.clear();
            state.current_detections.clear();
            state.last_results.clear();
            state.selector.reset();
            state.scheduler.reset();
            state.source_name = None;
            self.worker.cancel();
            was_running
        };
        if let Some(mut source) = lock(&self.source).take() {
            source.close();
        }
        if was_running {
            log::info!("capture session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    // ------------------------------------------------------------------
    // Mode
    // ------------------------------------------------------------------

    pub fn mode(&self) -> OperatingMode {
        lock(&self.state).mode.mode()
    }

    /// Flip Manual/Automatic. Entering Automatic drops the manual regions;
    /// leaving it drops the automatic results and cancels any batch still
    /// in flight.
    pub fn toggle_mode(&self) -> OperatingMode {
        let mut state = lock(&self.state);
        let mode = state.mode.toggle();
        match mode {
            OperatingMode::Automatic => {
                state.regions.clear();
                state.scheduler.reset();
            }
            OperatingMode::Manual => {
                state.current_detections.clear();
                state.last_results.clear();
                self.worker.cancel();
            }
        }
        log::info!("operating mode: {}", mode);
        mode
    }

    // ------------------------------------------------------------------
    // Manual flow
    // ------------------------------------------------------------------

    pub fn click(&self, x: Option<i64>, y: Option<i64>) -> Result<RegionSelection, CommandError> {
        self.click_at(x, y, Instant::now())
    }

    pub fn click_at(
        &self,
        x: Option<i64>,
        y: Option<i64>,
        now: Instant,
    ) -> Result<RegionSelection, CommandError> {
        let mut state = lock(&self.state);
        if state.mode.is_automatic() {
            return Err(CommandError::ModeDisabled);
        }
        let (Some(x), Some(y)) = (x, y) else {
            return Err(CommandError::MissingCoordinates);
        };
        let (width, height) = match (&state.frame, state.running) {
            (Some(frame), _) => (frame.width(), frame.height()),
            (None, false) => return Err(CommandError::NotRunning),
            (None, true) => return Err(CommandError::NoFrame),
        };
        let region = state
            .selector
            .create_region(width, height, x, y, now)
            .ok_or(CommandError::RegionRejected)?;
        let handle = state.regions.push(region);
        Ok(RegionSelection {
            handle,
            region,
            region_count: state.regions.len(),
        })
    }

    pub fn selected_regions(&self) -> Vec<BoundingBox> {
        lock(&self.state).regions.iter().copied().collect()
    }

    /// Classify a selected region by position. Nothing is recorded or sprayed.
    pub fn classify_region(&self, index: usize) -> Result<ClassificationResult, CommandError> {
        let handle = {
            let state = lock(&self.state);
            if state.mode.is_automatic() {
                return Err(CommandError::ModeDisabled);
            }
            state
                .regions
                .handle(index)
                .ok_or(CommandError::InvalidRegionIndex(index))?
        };
        self.classify_handle(handle)
    }

    /// Classify a region by handle, detecting handles that outlived a clear.
    pub fn classify_handle(
        &self,
        handle: RegionHandle,
    ) -> Result<ClassificationResult, CommandError> {
        let (frame, bbox) = {
            let state = lock(&self.state);
            if state.mode.is_automatic() {
                return Err(CommandError::ModeDisabled);
            }
            let bbox = match state.regions.resolve(handle) {
                Resolve::Found(bbox) => bbox,
                Resolve::OutOfRange => return Err(CommandError::InvalidRegionIndex(handle.index)),
                Resolve::Stale => return Err(CommandError::StaleRegion),
            };
            let frame = state.frame.clone().ok_or(CommandError::NoFrame)?;
            (frame, bbox)
        };
        // Network round-trip without holding the state lock.
        self.pipeline
            .classify_region(&frame, bbox)
            .map_err(CommandError::Classification)
    }

    // ------------------------------------------------------------------
    // Automatic flow
    // ------------------------------------------------------------------

    pub fn tick(&self) -> TickOutcome {
        self.tick_at(Instant::now())
    }

    /// Read one frame and, in Automatic mode, run scheduled detection.
    pub fn tick_at(&self, now: Instant) -> TickOutcome {
        self.collect_reports();

        let session = {
            let state = lock(&self.state);
            if !state.running {
                return TickOutcome::NotRunning;
            }
            state.session
        };

        let read = match lock(&self.source).as_mut() {
            Some(source) => source.read(),
            None => return TickOutcome::NotRunning,
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::FrameUnavailable,
            Err(e) => {
                log::warn!("frame read failed: {:#}", e);
                return TickOutcome::FrameUnavailable;
            }
        };

        {
            let mut state = lock(&self.state);
            if !state.running || state.session != session {
                return TickOutcome::Discarded;
            }
            state.frame = Some(frame.clone());
            state.frames_read += 1;
            if !state.mode.is_automatic() || !state.scheduler.due(now) {
                return TickOutcome::Idle;
            }
            if self.worker.is_busy() {
                state.batches_skipped += 1;
                log::debug!("detection tick skipped: previous batch still in flight");
                return TickOutcome::SkippedBusy;
            }
        }

        let candidates = lock(&self.detector).detect_leaves(frame.image());

        let mut state = lock(&self.state);
        if !state.running || state.session != session || !state.mode.is_automatic() {
            return TickOutcome::Discarded;
        }
        state.current_detections = candidates.clone();
        if candidates.is_empty() {
            return TickOutcome::NoLeaves;
        }
        let count = candidates.len();
        let job = BatchJob {
            session,
            frame,
            candidates,
        };
        match self.worker.try_submit(job) {
            Ok(Submit::Accepted) => {
                state.batches_dispatched += 1;
                log::info!("detected {} leaves; batch dispatched", count);
                TickOutcome::Dispatched(count)
            }
            Ok(Submit::Busy) => {
                state.batches_skipped += 1;
                TickOutcome::SkippedBusy
            }
            Err(e) => {
                log::error!("failed to dispatch detection batch: {:#}", e);
                TickOutcome::SkippedBusy
            }
        }
    }

    /// Latest per-candidate results. Only meaningful in Automatic mode.
    pub fn automatic_detections(&self) -> Result<Vec<CandidateOutcome>, CommandError> {
        self.collect_reports();
        let state = lock(&self.state);
        if !state.mode.is_automatic() {
            return Err(CommandError::AutomaticModeDisabled);
        }
        Ok(state.last_results.clone())
    }

    /// Candidates from the most recent detection pass, for overlays.
    pub fn current_detections(&self) -> Vec<DetectionCandidate> {
        lock(&self.state).current_detections.clone()
    }

    /// Block until a dispatched batch completes, applying its results.
    pub fn wait_for_batch(&self, timeout: Duration) -> Option<BatchReport> {
        let report = match lock(&self.reports).recv_timeout(timeout) {
            Ok(report) => report,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };
        self.apply_report(report.clone());
        Some(report)
    }

    fn collect_reports(&self) {
        let pending: Vec<BatchReport> = lock(&self.reports).try_iter().collect();
        for report in pending {
            self.apply_report(report);
        }
    }

    fn apply_report(&self, report: BatchReport) {
        let mut state = lock(&self.state);
        if report.session != state.session || !state.mode.is_automatic() {
            log::debug!(
                "dropping results for frame {} from an ended session or mode",
                report.frame_seq
            );
            return;
        }
        state.last_results = report.outcomes;
    }

    // ------------------------------------------------------------------
    // Field capture
    // ------------------------------------------------------------------

    /// Classify the whole current frame, record it and spray per policy.
    pub fn capture_and_treat(&self) -> Result<TreatmentReport, CommandError> {
        let frame = {
            let state = lock(&self.state);
            match (&state.frame, state.running) {
                (Some(frame), _) => frame.clone(),
                (None, false) => return Err(CommandError::NotRunning),
                (None, true) => return Err(CommandError::NoFrame),
            }
        };
        let report = self.pipeline.treat_capture(&frame)?;
        log::info!(
            "field capture {}: severity {:.1} -> {} ({} ms)",
            report.capture_id,
            report.classification.severity,
            report.decision.action,
            report.decision.duration_ms
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Introspection and command dispatch
    // ------------------------------------------------------------------

    pub fn status(&self) -> ServiceStatus {
        self.collect_reports();
        let (detector, detector_variant) = {
            let detector = lock(&self.detector);
            (detector.active_name(), detector.active())
        };
        let state = lock(&self.state);
        ServiceStatus {
            running: state.running,
            mode: state.mode.mode(),
            source: state.source_name.clone(),
            frames_read: state.frames_read,
            has_frame: state.frame.is_some(),
            regions: state.regions.iter().copied().collect(),
            region_generation: state.regions.generation(),
            current_detections: state.current_detections.len(),
            detector,
            detector_variant,
            batch_in_flight: self.worker.is_busy(),
            batches_dispatched: state.batches_dispatched,
            batches_skipped: state.batches_skipped,
        }
    }

    /// Drive `tick` at `interval` until `shutdown` is set.
    pub fn run_frame_loop(&self, shutdown: &AtomicBool, interval: Duration) {
        let mut last_health = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let outcome = self.tick_at(started);
            if outcome == TickOutcome::FrameUnavailable {
                log::debug!("no frame this tick");
            }
            if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                let status = self.status();
                log::info!(
                    "frame loop: running={} mode={} frames={} source={} batches={} skipped={}",
                    status.running,
                    status.mode,
                    status.frames_read,
                    status.source.as_deref().unwrap_or("-"),
                    status.batches_dispatched,
                    status.batches_skipped
                );
                last_health = Instant::now();
            }
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    pub fn execute(&self, command: Command) -> Result<Value, CommandError> {
        match command {
            Command::StartSession { source } => {
                let url = source.unwrap_or_else(|| self.default_source.clone());
                let started = self.start_url(&url);
                Ok(serde_json::json!({ "started": started, "source": url }))
            }
            Command::StopSession => {
                self.stop();
                Ok(serde_json::json!({ "stopped": true }))
            }
            Command::ToggleMode => {
                let mode = self.toggle_mode();
                Ok(serde_json::json!({ "mode": mode }))
            }
            Command::Click { x, y } => to_payload(&self.click(x, y)?),
            Command::ClassifyRegion { region_index } => {
                to_payload(&self.classify_region(region_index)?)
            }
            Command::AutomaticDetections => {
                let results = self.automatic_detections()?;
                let current = self.current_detections();
                Ok(serde_json::json!({
                    "detections": to_payload(&results)?,
                    "current": to_payload(&current)?,
                }))
            }
            Command::Capture => to_payload(&self.capture_and_treat()?),
            Command::Recent { limit } => {
                let recent = self
                    .pipeline
                    .recent(limit.unwrap_or(DEFAULT_RECENT_LIMIT))
                    .map_err(|e| CommandError::Processing(format!("{:#}", e)))?;
                to_payload(&recent)
            }
            Command::Status => to_payload(&self.status()),
        }
    }
}

impl Drop for VideoService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Processing(e.to_string()))
}
