use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use super::FrameSource;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Local still image, or a directory of images cycled in name order.
pub struct StillImageSource {
    path: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    frame_count: u64,
}

impl StillImageSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            files: Vec::new(),
            next: 0,
            frame_count: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn open(&mut self) -> Result<()> {
        let meta = std::fs::metadata(&self.path)
            .with_context(|| format!("open image source {}", self.path.display()))?;
        let mut files = if meta.is_dir() {
            std::fs::read_dir(&self.path)
                .with_context(|| format!("list {}", self.path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| {
                            IMAGE_EXTENSIONS
                                .iter()
                                .any(|known| ext.eq_ignore_ascii_case(known))
                        })
                })
                .collect::<Vec<_>>()
        } else {
            vec![self.path.clone()]
        };
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.path.display()));
        }
        files.sort();
        log::info!(
            "source {}: {} still image(s)",
            self.path.display(),
            files.len()
        );
        self.files = files;
        self.next = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if self.files.is_empty() {
            return Ok(None);
        }
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .into_rgb8();
        self.frame_count += 1;
        Ok(Some(Frame::new(image, self.frame_count)))
    }

    fn close(&mut self) {
        self.files.clear();
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
