mod backend;
mod backends;
mod result;
mod service;

pub use backend::{DetectorVariant, LeafDetector};
pub use backends::{ColorContourBackend, ColorContourConfig};
pub use result::DetectionCandidate;
pub use service::{load_model_backend, DetectorInitError, LeafDetectionService};

#[cfg(feature = "backend-tract")]
pub use backends::TractLeafBackend;
