use std::path::PathBuf;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::config::DetectorSettings;
use crate::detect::backend::{DetectorVariant, LeafDetector};
use crate::detect::backends::ColorContourBackend;
use crate::detect::result::DetectionCandidate;
use crate::schedule::{DetectionScheduler, SERVICE_DETECTION_INTERVAL};

/// Why the Model variant could not be brought up.
#[derive(Debug)]
pub enum DetectorInitError {
    ModelNotConfigured,
    ModelMissing(PathBuf),
    BackendUnavailable,
    Load(String),
}

impl std::fmt::Display for DetectorInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorInitError::ModelNotConfigured => write!(f, "no leaf model configured"),
            DetectorInitError::ModelMissing(path) => {
                write!(f, "leaf model not found at {}", path.display())
            }
            DetectorInitError::BackendUnavailable => {
                write!(f, "inference backend not compiled in (enable backend-tract)")
            }
            DetectorInitError::Load(msg) => write!(f, "leaf model failed to load: {}", msg),
        }
    }
}

impl std::error::Error for DetectorInitError {}

/// Build and warm up the Model variant described by `settings`.
pub fn load_model_backend(
    settings: &DetectorSettings,
) -> Result<Box<dyn LeafDetector>, DetectorInitError> {
    let path = settings
        .model_path
        .clone()
        .ok_or(DetectorInitError::ModelNotConfigured)?;
    if !path.exists() {
        return Err(DetectorInitError::ModelMissing(path));
    }
    load_tract(&path, settings)
}

#[cfg(feature = "backend-tract")]
fn load_tract(
    path: &std::path::Path,
    settings: &DetectorSettings,
) -> Result<Box<dyn LeafDetector>, DetectorInitError> {
    use crate::detect::backends::TractLeafBackend;

    let mut backend = TractLeafBackend::new(path, settings.input_size)
        .map_err(|e| DetectorInitError::Load(format!("{:#}", e)))?
        .with_threshold(settings.confidence_threshold)
        .with_leaf_class(settings.leaf_class_id);
    backend
        .warm_up()
        .map_err(|e| DetectorInitError::Load(format!("warm-up: {:#}", e)))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(
    _path: &std::path::Path,
    _settings: &DetectorSettings,
) -> Result<Box<dyn LeafDetector>, DetectorInitError> {
    Err(DetectorInitError::BackendUnavailable)
}

/// Leaf detection with a permanent Model → Fallback degrade.
///
/// The Model variant is tried once at construction. If it did not come up,
/// the colour/contour fallback serves every call for the lifetime of the
/// service; there is no later retry. A Model inference error on a single
/// frame falls back for that frame only.
pub struct LeafDetectionService {
    primary: Option<Box<dyn LeafDetector>>,
    fallback: ColorContourBackend,
    scheduler: DetectionScheduler,
    init_error: Option<String>,
}

impl LeafDetectionService {
    /// Resolve an initialisation result into a running service.
    ///
    /// This is the single place the degrade decision is made and logged.
    pub fn from_init(result: Result<Box<dyn LeafDetector>, DetectorInitError>) -> Self {
        let (primary, init_error) = match result {
            Ok(backend) => {
                log::info!("leaf detector: model backend '{}' active", backend.name());
                (Some(backend), None)
            }
            Err(DetectorInitError::ModelNotConfigured) => {
                log::info!("leaf detector: no model configured, using color-contour fallback");
                (None, Some(DetectorInitError::ModelNotConfigured.to_string()))
            }
            Err(e) => {
                log::warn!("leaf detector: {}; using color-contour fallback", e);
                (None, Some(e.to_string()))
            }
        };
        Self {
            primary,
            fallback: ColorContourBackend::new(),
            scheduler: DetectionScheduler::new(SERVICE_DETECTION_INTERVAL),
            init_error,
        }
    }

    pub fn initialize(settings: &DetectorSettings) -> Self {
        Self::from_init(load_model_backend(settings))
    }

    pub fn fallback_only() -> Self {
        Self::from_init(Err(DetectorInitError::ModelNotConfigured))
    }

    /// Replace the standalone polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.scheduler = DetectionScheduler::new(interval);
        self
    }

    pub fn active(&self) -> DetectorVariant {
        match &self.primary {
            Some(backend) => backend.variant(),
            None => DetectorVariant::Fallback,
        }
    }

    pub fn active_name(&self) -> &'static str {
        match &self.primary {
            Some(backend) => backend.name(),
            None => self.fallback.name(),
        }
    }

    /// Reason the Model variant is not active, if it is not.
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Detect leaves on a frame. Never fails; errors degrade to fewer results.
    pub fn detect_leaves(&mut self, frame: &RgbImage) -> Vec<DetectionCandidate> {
        if let Some(primary) = self.primary.as_mut() {
            match primary.detect(frame) {
                Ok(candidates) => return candidates,
                Err(e) => log::warn!(
                    "{} inference failed: {:#}; using fallback for this frame",
                    primary.name(),
                    e
                ),
            }
        }
        match self.fallback.detect(frame) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("fallback leaf detection failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Standalone polling gate (2 s), used outside the video loop.
    pub fn should_detect(&mut self, now: Instant) -> bool {
        self.scheduler.due(now)
    }
}

impl Default for LeafDetectionService {
    fn default() -> Self {
        Self::fallback_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use image::Rgb;

    struct FailingModel;

    impl LeafDetector for FailingModel {
        fn name(&self) -> &'static str {
            "failing-model"
        }

        fn variant(&self) -> DetectorVariant {
            DetectorVariant::Model
        }

        fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<DetectionCandidate>> {
            Err(anyhow!("tensor shape mismatch"))
        }
    }

    fn green_square_frame() -> RgbImage {
        let mut img = RgbImage::new(320, 240);
        for y in 50..150 {
            for x in 60..160 {
                img.put_pixel(x, y, Rgb([30, 200, 40]));
            }
        }
        img
    }

    #[test]
    fn unconfigured_model_degrades_to_fallback() {
        let settings = DetectorSettings::default();
        let service = LeafDetectionService::initialize(&settings);
        assert_eq!(service.active(), DetectorVariant::Fallback);
        assert_eq!(service.active_name(), "color-contour");
        assert!(service.init_error().is_some());
    }

    #[test]
    fn missing_model_file_is_reported() {
        let settings = DetectorSettings {
            model_path: Some(PathBuf::from("/nonexistent/leaf.onnx")),
            ..DetectorSettings::default()
        };
        match load_model_backend(&settings) {
            Err(DetectorInitError::ModelMissing(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/leaf.onnx"))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected init failure"),
        }
    }

    #[test]
    fn model_inference_error_uses_fallback_for_that_frame() {
        let mut service = LeafDetectionService::from_init(Ok(Box::new(FailingModel)));
        assert_eq!(service.active(), DetectorVariant::Model);
        let candidates = service.detect_leaves(&green_square_frame());
        assert_eq!(candidates.len(), 1);
        // Model stays primary; no permanent switch on a per-frame error.
        assert_eq!(service.active(), DetectorVariant::Model);
    }

    #[test]
    fn standalone_gate_uses_two_second_interval() {
        let mut service = LeafDetectionService::fallback_only();
        let t0 = Instant::now();
        assert!(service.should_detect(t0));
        assert!(!service.should_detect(t0 + Duration::from_millis(1_900)));
        assert!(service.should_detect(t0 + Duration::from_millis(2_000)));
    }
}
