//! Crop → classify → decide → record → actuate.
//!
//! Shared by the manual, automatic and field-capture flows. Only the
//! automatic batch and the field capture persist and actuate; manual
//! classification returns the classifier's answer and nothing else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::actuate::Actuator;
use crate::classify::{encode_jpeg, ClassificationResult, Classifier, ClassifyError};
use crate::config::LeafguardConfig;
use crate::detect::DetectionCandidate;
use crate::frame::Frame;
use crate::geometry::{crop, resize_square, BoundingBox};
use crate::lock;
use crate::policy::{ActionDecision, SprayPolicy};
use crate::storage::{CropArchive, DetectionStore, RecentActivity};

const BATCH_CANCELLED: &str = "batch cancelled";

#[derive(Debug)]
pub enum PipelineError {
    Classify(ClassifyError),
    Store(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Classify(e) => write!(f, "{}", e),
            PipelineError::Store(msg) => write!(f, "failed to record detection: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ClassifyError> for PipelineError {
    fn from(e: ClassifyError) -> Self {
        PipelineError::Classify(e)
    }
}

/// Result for one candidate of an automatic batch.
///
/// A failed candidate carries `error` and nothing was recorded or sprayed
/// for it.
#[derive(Clone, Debug, Serialize)]
pub struct CandidateOutcome {
    pub leaf_index: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<ActionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_id: Option<i64>,
    pub actuated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of classifying and treating a whole frame.
#[derive(Clone, Debug, Serialize)]
pub struct TreatmentReport {
    pub image_ref: String,
    pub classification: ClassificationResult,
    pub decision: ActionDecision,
    pub capture_id: i64,
    pub detection_id: i64,
    pub actuated: bool,
}

struct Recorded {
    capture_id: i64,
    detection_id: i64,
    actuated: bool,
}

pub struct DetectionPipeline {
    classifier: Arc<dyn Classifier>,
    store: Arc<Mutex<dyn DetectionStore>>,
    actuator: Arc<Mutex<dyn Actuator>>,
    archive: CropArchive,
    policy: SprayPolicy,
    classifier_input: u32,
    jpeg_quality: u8,
}

impl DetectionPipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<Mutex<dyn DetectionStore>>,
        actuator: Arc<Mutex<dyn Actuator>>,
    ) -> Self {
        Self {
            classifier,
            store,
            actuator,
            archive: CropArchive::in_memory(),
            policy: SprayPolicy::default(),
            classifier_input: 224,
            jpeg_quality: 90,
        }
    }

    pub fn from_config(
        config: &LeafguardConfig,
        classifier: Arc<dyn Classifier>,
        store: Arc<Mutex<dyn DetectionStore>>,
        actuator: Arc<Mutex<dyn Actuator>>,
    ) -> Self {
        Self::new(classifier, store, actuator)
            .with_policy(config.policy)
            .with_archive(CropArchive::new(config.image_dir.clone()))
            .with_classifier_input(config.classifier.input_size, config.classifier.jpeg_quality)
    }

    pub fn with_policy(mut self, policy: SprayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_archive(mut self, archive: CropArchive) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_classifier_input(mut self, size: u32, jpeg_quality: u8) -> Self {
        self.classifier_input = size.max(1);
        self.jpeg_quality = jpeg_quality;
        self
    }

    /// Classify one region of a frame. Nothing is recorded or actuated.
    pub fn classify_region(
        &self,
        frame: &Frame,
        bbox: BoundingBox,
    ) -> Result<ClassificationResult, ClassifyError> {
        let leaf = crop(frame.image(), &bbox);
        self.classify_image(&leaf)
    }

    fn classify_image(&self, leaf: &image::RgbImage) -> Result<ClassificationResult, ClassifyError> {
        let input = resize_square(leaf, self.classifier_input);
        let jpeg = encode_jpeg(&input, self.jpeg_quality)?;
        self.classifier.classify(&jpeg)
    }

    /// Classify, record and treat every candidate of one detection pass.
    ///
    /// Candidates are independent: a failure is reported on that candidate
    /// and the rest of the batch continues.
    pub fn process_candidates(
        &self,
        frame: &Frame,
        candidates: &[DetectionCandidate],
    ) -> Vec<CandidateOutcome> {
        self.process_candidates_until(frame, candidates, &AtomicBool::new(false))
    }

    /// Like `process_candidates`, but stops recording and spraying once
    /// `cancelled` is set. Remaining candidates are reported as cancelled.
    pub fn process_candidates_until(
        &self,
        frame: &Frame,
        candidates: &[DetectionCandidate],
        cancelled: &AtomicBool,
    ) -> Vec<CandidateOutcome> {
        candidates
            .iter()
            .enumerate()
            .map(|(leaf_index, candidate)| {
                self.process_candidate(frame, leaf_index, candidate, cancelled)
            })
            .collect()
    }

    fn process_candidate(
        &self,
        frame: &Frame,
        leaf_index: usize,
        candidate: &DetectionCandidate,
        cancelled: &AtomicBool,
    ) -> CandidateOutcome {
        let mut outcome = CandidateOutcome {
            leaf_index,
            bbox: candidate.bbox,
            confidence: candidate.confidence,
            classification: None,
            decision: None,
            capture_id: None,
            detection_id: None,
            actuated: false,
            error: None,
        };

        if cancelled.load(Ordering::SeqCst) {
            outcome.error = Some(BATCH_CANCELLED.to_string());
            return outcome;
        }
        let leaf = crop(frame.image(), &candidate.bbox);
        let classification = match self.classify_image(&leaf) {
            Ok(classification) => classification,
            Err(e) => {
                log::warn!("leaf {}: classification failed: {}", leaf_index, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        let decision = self.policy.decide(classification.severity);
        // The session may have ended while the classifier was answering.
        if cancelled.load(Ordering::SeqCst) {
            log::debug!("leaf {}: batch cancelled, not recorded", leaf_index);
            outcome.classification = Some(classification);
            outcome.error = Some(BATCH_CANCELLED.to_string());
            return outcome;
        }

        match self
            .archive
            .save_crop(&leaf, leaf_index)
            .map_err(|e| PipelineError::Store(format!("{:#}", e)))
            .and_then(|image_ref| self.record_and_treat(&image_ref, &classification, decision))
        {
            Ok(recorded) => {
                outcome.capture_id = Some(recorded.capture_id);
                outcome.detection_id = Some(recorded.detection_id);
                outcome.actuated = recorded.actuated;
            }
            Err(e) => {
                log::warn!("leaf {}: {}", leaf_index, e);
                outcome.error = Some(e.to_string());
            }
        }
        outcome.classification = Some(classification);
        outcome.decision = Some(decision);
        outcome
    }

    /// Field capture: classify the whole frame, record it and spray per policy.
    pub fn treat_capture(&self, frame: &Frame) -> Result<TreatmentReport, PipelineError> {
        let classification = self.classify_image(frame.image())?;
        let decision = self.policy.decide(classification.severity);
        let image_ref = self
            .archive
            .save_capture(frame.image(), frame.seq())
            .map_err(|e| PipelineError::Store(format!("{:#}", e)))?;
        let recorded = self.record_and_treat(&image_ref, &classification, decision)?;
        Ok(TreatmentReport {
            image_ref,
            classification,
            decision,
            capture_id: recorded.capture_id,
            detection_id: recorded.detection_id,
            actuated: recorded.actuated,
        })
    }

    /// Latest captures, detections and actions from the store.
    pub fn recent(&self, limit: usize) -> anyhow::Result<RecentActivity> {
        lock(&self.store).recent(limit)
    }

    fn record_and_treat(
        &self,
        image_ref: &str,
        classification: &ClassificationResult,
        decision: ActionDecision,
    ) -> Result<Recorded, PipelineError> {
        let (capture_id, detection_id) = {
            let mut store = lock(&self.store);
            let capture_id = store
                .record_capture(image_ref)
                .map_err(|e| PipelineError::Store(format!("{:#}", e)))?;
            let detection_id = store
                .record_detection(
                    capture_id,
                    classification.disease.as_deref(),
                    classification.severity,
                    &classification.raw_payload,
                )
                .map_err(|e| PipelineError::Store(format!("{:#}", e)))?;
            store
                .record_action(detection_id, decision.action, decision.duration_ms)
                .map_err(|e| PipelineError::Store(format!("{:#}", e)))?;
            (capture_id, detection_id)
        };

        let mut actuated = false;
        if decision.actuates() {
            match lock(&self.actuator).activate(decision.duration_ms) {
                Ok(()) => actuated = true,
                Err(e) => log::error!(
                    "sprayer failed for detection {} ({} ms): {:#}",
                    detection_id,
                    decision.duration_ms,
                    e
                ),
            }
        }
        Ok(Recorded {
            capture_id,
            detection_id,
            actuated,
        })
    }
}
