pub mod color;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use color::{ColorContourBackend, ColorContourConfig};

#[cfg(feature = "backend-tract")]
pub use tract::TractLeafBackend;
