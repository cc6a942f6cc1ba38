use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use serde_json::json;

use leafguard::{
    Actuator, ClassificationResult, Classifier, ClassifyError, Command, CommandError,
    DetectionPipeline, DetectionStore, Frame, FrameSource, InMemoryDetectionStore,
    LeafDetectionService, OperatingMode, TickOutcome, VideoService,
};

const BATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Brown soil with three well separated green leaves.
fn garden_image() -> RgbImage {
    let mut img = RgbImage::from_pixel(640, 480, Rgb([90, 60, 40]));
    for (x0, y0) in [(60u32, 60u32), (280, 200), (480, 340)] {
        for y in y0..y0 + 80 {
            for x in x0..x0 + 80 {
                img.put_pixel(x, y, Rgb([30, 200, 40]));
            }
        }
    }
    img
}

struct GardenSource {
    image: RgbImage,
    seq: u64,
    open: bool,
    fail_open: bool,
}

impl GardenSource {
    fn new() -> Self {
        Self {
            image: garden_image(),
            seq: 0,
            open: false,
            fail_open: false,
        }
    }

    fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }
}

impl FrameSource for GardenSource {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("camera offline"));
        }
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Ok(None);
        }
        self.seq += 1;
        Ok(Some(Frame::new(self.image.clone(), self.seq)))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn describe(&self) -> String {
        "garden-test".to_string()
    }
}

/// Answers with a fixed severity; optionally fails one call by position.
struct ScriptedClassifier {
    severity: f32,
    fail_call: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    fn new(severity: f32, fail_call: Option<usize>) -> Self {
        Self {
            severity,
            fail_call,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, _jpeg: &[u8]) -> Result<ClassificationResult, ClassifyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_call == Some(call) {
            return Err(ClassifyError::Transport("connection reset".to_string()));
        }
        ClassificationResult::from_payload(json!({
            "disease": "leaf_rust",
            "severity": self.severity,
        }))
    }
}

/// Blocks each read until the test releases it, announcing when it starts.
struct BlockingSource {
    entered: Sender<()>,
    release: Receiver<()>,
    seq: u64,
}

impl FrameSource for BlockingSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let _ = self.entered.send(());
        self.release
            .recv_timeout(BATCH_TIMEOUT)
            .map_err(|_| anyhow!("read never released"))?;
        self.seq += 1;
        Ok(Some(Frame::new(garden_image(), self.seq)))
    }

    fn close(&mut self) {}

    fn describe(&self) -> String {
        "blocking-test".to_string()
    }
}

/// Blocks each call until the test releases it.
struct GatedClassifier {
    gate: Mutex<Receiver<()>>,
    severity: f32,
}

impl GatedClassifier {
    fn new(gate: Receiver<()>, severity: f32) -> Self {
        Self {
            gate: Mutex::new(gate),
            severity,
        }
    }
}

impl Classifier for GatedClassifier {
    fn classify(&self, _jpeg: &[u8]) -> Result<ClassificationResult, ClassifyError> {
        let gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let _ = gate.recv_timeout(BATCH_TIMEOUT);
        ClassificationResult::from_payload(json!({ "disease": null, "severity": self.severity }))
    }
}

#[derive(Clone, Default)]
struct RecordingSprayer {
    pulses: Arc<Mutex<Vec<u32>>>,
}

impl RecordingSprayer {
    fn pulses(&self) -> Vec<u32> {
        self.pulses.lock().unwrap().clone()
    }
}

impl Actuator for RecordingSprayer {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn activate(&mut self, duration_ms: u32) -> Result<()> {
        if duration_ms > 0 {
            self.pulses.lock().unwrap().push(duration_ms);
        }
        Ok(())
    }
}

struct Harness {
    service: VideoService,
    store: Arc<Mutex<InMemoryDetectionStore>>,
    sprayer: RecordingSprayer,
}

fn harness(classifier: Arc<dyn Classifier>) -> Harness {
    let store = Arc::new(Mutex::new(InMemoryDetectionStore::new()));
    let sprayer = RecordingSprayer::default();
    let shared_store: Arc<Mutex<dyn DetectionStore>> = store.clone();
    let shared_sprayer: Arc<Mutex<dyn Actuator>> = Arc::new(Mutex::new(sprayer.clone()));
    let pipeline = DetectionPipeline::new(classifier, shared_store, shared_sprayer);
    let service = VideoService::with_defaults(LeafDetectionService::fallback_only(), pipeline)
        .expect("service");
    Harness {
        service,
        store,
        sprayer,
    }
}

fn started(classifier: Arc<dyn Classifier>) -> Harness {
    let h = harness(classifier);
    assert!(h.service.start(Box::new(GardenSource::new())));
    h
}

#[test]
fn automatic_batch_isolates_a_failed_classification() {
    let h = started(Arc::new(ScriptedClassifier::new(85.0, Some(1))));
    assert_eq!(h.service.toggle_mode(), OperatingMode::Automatic);

    assert_eq!(h.service.tick_at(Instant::now()), TickOutcome::Dispatched(3));
    assert_eq!(h.service.current_detections().len(), 3);
    let report = h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.failures(), 1);

    let failed = report.outcomes.iter().find(|o| !o.is_ok()).unwrap();
    assert!(failed.capture_id.is_none());
    assert!(!failed.actuated);
    assert!(failed.error.as_deref().unwrap().contains("connection reset"));

    {
        let store = h.store.lock().unwrap();
        assert_eq!(store.captures().len(), 2);
        assert_eq!(store.detections().len(), 2);
        assert_eq!(store.actions().len(), 2);
        assert!(store.actions().iter().all(|a| a.action == "spray_long"));
        assert!(store
            .detections()
            .iter()
            .all(|d| d.disease.as_deref() == Some("leaf_rust")));
    }
    assert_eq!(h.sprayer.pulses(), vec![3000, 3000]);

    let results = h.service.automatic_detections().expect("automatic mode");
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|o| o.actuated).count(), 2);
}

#[test]
fn detection_waits_for_the_interval() {
    let h = started(Arc::new(ScriptedClassifier::new(10.0, None)));
    h.service.toggle_mode();

    let t0 = Instant::now();
    assert_eq!(h.service.tick_at(t0), TickOutcome::Dispatched(3));
    h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");
    assert_eq!(
        h.service.tick_at(t0 + Duration::from_millis(1_500)),
        TickOutcome::Idle
    );
    assert_eq!(
        h.service.tick_at(t0 + Duration::from_secs(3)),
        TickOutcome::Dispatched(3)
    );
    h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");

    // Severity 10 is below the low threshold: recorded, never sprayed.
    assert_eq!(h.store.lock().unwrap().actions().len(), 6);
    assert!(h.sprayer.pulses().is_empty());
}

#[test]
fn busy_worker_skips_the_next_detection() {
    let (release, gate): (Sender<()>, Receiver<()>) = mpsc::channel();
    let h = started(Arc::new(GatedClassifier::new(gate, 10.0)));
    h.service.toggle_mode();

    let t0 = Instant::now();
    assert_eq!(h.service.tick_at(t0), TickOutcome::Dispatched(3));
    assert_eq!(
        h.service.tick_at(t0 + Duration::from_secs(3)),
        TickOutcome::SkippedBusy
    );
    assert_eq!(h.service.status().batches_skipped, 1);

    for _ in 0..3 {
        release.send(()).unwrap();
    }
    let report = h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");
    assert_eq!(report.failures(), 0);
    assert_eq!(
        h.service.tick_at(t0 + Duration::from_secs(6)),
        TickOutcome::Dispatched(3)
    );
    for _ in 0..3 {
        release.send(()).unwrap();
    }
    h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");
    assert_eq!(h.service.status().batches_dispatched, 2);
}

#[test]
fn manual_classification_records_and_sprays_nothing() {
    let h = started(Arc::new(ScriptedClassifier::new(90.0, None)));
    assert_eq!(h.service.tick_at(Instant::now()), TickOutcome::Idle);

    let selection = h
        .service
        .click_at(Some(320), Some(240), Instant::now())
        .expect("region");
    assert_eq!(selection.region_count, 1);
    assert_eq!(selection.region.width(), 150);

    let result = h.service.classify_region(0).expect("classification");
    assert_eq!(result.disease.as_deref(), Some("leaf_rust"));
    assert_eq!(result.severity, 90.0);

    let store = h.store.lock().unwrap();
    assert!(store.captures().is_empty());
    assert!(store.actions().is_empty());
    assert!(h.sprayer.pulses().is_empty());
}

#[test]
fn click_cooldown_drops_rapid_clicks() {
    let h = started(Arc::new(ScriptedClassifier::new(0.0, None)));
    h.service.tick_at(Instant::now());

    let t0 = Instant::now();
    h.service.click_at(Some(100), Some(100), t0).expect("first");
    assert!(matches!(
        h.service.click_at(Some(400), Some(300), t0 + Duration::from_millis(300)),
        Err(CommandError::RegionRejected)
    ));
    h.service
        .click_at(Some(400), Some(300), t0 + Duration::from_secs(1))
        .expect("after cooldown");
    assert_eq!(h.service.selected_regions().len(), 2);
}

#[test]
fn automatic_mode_rejects_manual_commands() {
    let h = started(Arc::new(ScriptedClassifier::new(50.0, None)));
    h.service.tick_at(Instant::now());
    h.service
        .click_at(Some(320), Some(240), Instant::now())
        .expect("manual region");

    // Entering automatic mode drops the manual regions.
    h.service.toggle_mode();
    assert!(h.service.selected_regions().is_empty());

    let later = Instant::now() + Duration::from_secs(5);
    assert!(matches!(
        h.service.click_at(Some(320), Some(240), later),
        Err(CommandError::ModeDisabled)
    ));
    assert!(matches!(
        h.service.classify_region(0),
        Err(CommandError::ModeDisabled)
    ));
    assert!(h.service.selected_regions().is_empty());

    let err = h
        .service
        .execute(Command::parse(r#"{"command": "click", "x": 10, "y": 10}"#).unwrap())
        .unwrap_err();
    assert_eq!(err.to_payload()["error"], "manual detection disabled in automatic mode");
}

#[test]
fn automatic_results_require_automatic_mode() {
    let h = started(Arc::new(ScriptedClassifier::new(50.0, None)));
    assert!(matches!(
        h.service.automatic_detections(),
        Err(CommandError::AutomaticModeDisabled)
    ));
}

#[test]
fn toggling_twice_restores_the_mode() {
    let h = harness(Arc::new(ScriptedClassifier::new(0.0, None)));
    assert_eq!(h.service.mode(), OperatingMode::Manual);
    h.service.toggle_mode();
    h.service.toggle_mode();
    assert_eq!(h.service.mode(), OperatingMode::Manual);

    let reply = h
        .service
        .execute(Command::parse(r#"{"command": "toggle_mode"}"#).unwrap())
        .unwrap();
    assert_eq!(reply, json!({ "mode": "automatic" }));
}

#[test]
fn stop_clears_session_state() {
    let h = started(Arc::new(ScriptedClassifier::new(50.0, None)));
    h.service.tick_at(Instant::now());
    h.service
        .click_at(Some(320), Some(240), Instant::now())
        .expect("region");

    h.service.stop();
    let status = h.service.status();
    assert!(!status.running);
    assert!(!status.has_frame);
    assert!(status.regions.is_empty());
    assert_eq!(status.current_detections, 0);
    assert!(status.source.is_none());
    assert_eq!(h.service.tick_at(Instant::now()), TickOutcome::NotRunning);
    assert!(matches!(
        h.service.click_at(Some(10), Some(10), Instant::now() + Duration::from_secs(5)),
        Err(CommandError::NotRunning)
    ));

    // Stopping twice is harmless.
    h.service.stop();
    assert!(!h.service.is_running());
}

#[test]
fn frame_read_during_stop_is_discarded() {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let h = harness(Arc::new(ScriptedClassifier::new(50.0, None)));
    assert!(h.service.start(Box::new(BlockingSource {
        entered: entered_tx,
        release: release_rx,
        seq: 0,
    })));

    let service = &h.service;
    std::thread::scope(|s| {
        let tick = s.spawn(|| service.tick_at(Instant::now()));
        entered.recv_timeout(BATCH_TIMEOUT).expect("read started");

        // stop() ends the session at once, then waits for the source.
        let stopper = s.spawn(|| service.stop());
        let deadline = Instant::now() + BATCH_TIMEOUT;
        while service.is_running() {
            assert!(Instant::now() < deadline, "stop never took effect");
            std::thread::sleep(Duration::from_millis(5));
        }
        release.send(()).unwrap();

        assert_eq!(tick.join().unwrap(), TickOutcome::Discarded);
        stopper.join().unwrap();
    });

    let status = h.service.status();
    assert!(!status.running);
    assert!(!status.has_frame);
    assert_eq!(status.frames_read, 0);
}

#[test]
fn stop_cancels_the_batch_in_flight() {
    let (release, gate) = mpsc::channel();
    let h = started(Arc::new(GatedClassifier::new(gate, 90.0)));
    h.service.toggle_mode();
    assert_eq!(h.service.tick_at(Instant::now()), TickOutcome::Dispatched(3));

    h.service.stop();
    for _ in 0..3 {
        release.send(()).unwrap();
    }
    let report = h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");
    assert_eq!(report.failures(), 3);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.error.as_deref() == Some("batch cancelled") && !o.actuated));

    // Mode survives stop; the stale results do not.
    assert_eq!(h.service.mode(), OperatingMode::Automatic);
    assert!(h.service.automatic_detections().unwrap().is_empty());
    {
        let store = h.store.lock().unwrap();
        assert!(store.captures().is_empty());
        assert!(store.actions().is_empty());
    }
    assert!(h.sprayer.pulses().is_empty());
}

#[test]
fn leaving_automatic_mode_drops_the_running_batch() {
    let (release, gate) = mpsc::channel();
    let h = started(Arc::new(GatedClassifier::new(gate, 90.0)));
    assert_eq!(h.service.toggle_mode(), OperatingMode::Automatic);
    assert_eq!(h.service.tick_at(Instant::now()), TickOutcome::Dispatched(3));

    assert_eq!(h.service.toggle_mode(), OperatingMode::Manual);
    for _ in 0..3 {
        release.send(()).unwrap();
    }
    h.service.wait_for_batch(BATCH_TIMEOUT).expect("batch report");

    assert_eq!(h.service.toggle_mode(), OperatingMode::Automatic);
    assert!(h.service.automatic_detections().unwrap().is_empty());
    assert!(h.store.lock().unwrap().detections().is_empty());
    assert!(h.sprayer.pulses().is_empty());
}

#[test]
fn region_handle_goes_stale_after_stop() {
    let h = started(Arc::new(ScriptedClassifier::new(50.0, None)));
    h.service.tick_at(Instant::now());
    let selection = h
        .service
        .click_at(Some(320), Some(240), Instant::now())
        .expect("region");

    h.service.stop();
    assert!(matches!(
        h.service.classify_handle(selection.handle),
        Err(CommandError::StaleRegion)
    ));
}

#[test]
fn unreachable_source_leaves_service_stopped() {
    let h = harness(Arc::new(ScriptedClassifier::new(0.0, None)));
    assert!(!h.service.start(Box::new(GardenSource::unreachable())));
    assert!(!h.service.is_running());
    assert!(matches!(
        h.service.capture_and_treat(),
        Err(CommandError::NotRunning)
    ));
}

#[test]
fn field_capture_records_and_sprays() {
    let h = started(Arc::new(ScriptedClassifier::new(45.0, None)));
    h.service.tick_at(Instant::now());

    let report = h.service.capture_and_treat().expect("capture");
    assert_eq!(report.decision.duration_ms, 1000);
    assert!(report.actuated);
    assert_eq!(h.sprayer.pulses(), vec![1000]);

    let recent = h
        .service
        .execute(Command::parse(r#"{"command": "recent", "limit": 5}"#).unwrap())
        .unwrap();
    assert_eq!(recent["captures"].as_array().unwrap().len(), 1);
    assert_eq!(recent["actions"][0]["action"], "spray_short");
}
