//! Frame sources.
//!
//! A source is chosen by URL:
//! - `stub://…` synthetic garden scene (demos and tests)
//! - `http(s)://…` camera over HTTP, MJPEG stream or JPEG snapshots
//! - anything else is a local still image or a directory of images
//!
//! `read` returning `Ok(None)` means "no frame this tick"; the frame loop
//! treats it the same as a transient error and simply skips detection.

mod http;
mod still;
mod synthetic;

pub use http::HttpCameraSource;
pub use still::StillImageSource;
pub use synthetic::SyntheticGardenSource;

use anyhow::{anyhow, Result};
use url::Url;

use crate::frame::Frame;

pub trait FrameSource: Send {
    /// Acquire the underlying resource. Called once before the first read.
    fn open(&mut self) -> Result<()>;

    fn read(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource. Safe to call more than once.
    fn close(&mut self);

    fn describe(&self) -> String;
}

/// Build (but do not open) the source named by `url`.
pub fn open_source(url: &str) -> Result<Box<dyn FrameSource>> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("frame source url is empty"));
    }
    match Url::parse(url) {
        Ok(parsed) => match parsed.scheme() {
            "stub" => Ok(Box::new(SyntheticGardenSource::new(url))),
            "http" | "https" => Ok(Box::new(HttpCameraSource::new(url))),
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| anyhow!("invalid file url '{}'", url))?;
                Ok(Box::new(StillImageSource::new(path)))
            }
            other if other.len() == 1 => {
                // Windows drive letter, e.g. `C:\images`.
                Ok(Box::new(StillImageSource::new(url.into())))
            }
            other => Err(anyhow!(
                "unsupported source scheme '{}'; expected stub, http(s), file or a local path",
                other
            )),
        },
        Err(_) => Ok(Box::new(StillImageSource::new(url.into()))),
    }
}
