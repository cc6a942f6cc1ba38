use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use super::FrameSource;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Camera served over HTTP.
///
/// When the server answers with a `multipart/*` content type the response is
/// treated as an MJPEG stream and frames are cut at JPEG SOI/EOI markers.
/// Otherwise every read fetches a fresh JPEG snapshot.
pub struct HttpCameraSource {
    url: String,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot { pending: Option<Vec<u8>> },
}

impl HttpCameraSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(READ_TIMEOUT)
                .timeout_read(READ_TIMEOUT)
                .build(),
            stream: None,
            frame_count: 0,
        }
    }
}

impl FrameSource for HttpCameraSource {
    fn open(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        let stream = if content_type.to_lowercase().contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::Snapshot {
                pending: Some(read_body(response)?),
            }
        };
        log::info!(
            "source {}: {}",
            self.url,
            match stream {
                HttpStream::Mjpeg(_) => "mjpeg stream",
                HttpStream::Snapshot { .. } => "jpeg snapshots",
            }
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let jpeg = match self.stream.as_mut() {
            None => return Ok(None),
            Some(HttpStream::Mjpeg(stream)) => stream.read_next_jpeg()?,
            Some(HttpStream::Snapshot { pending }) => match pending.take() {
                Some(bytes) => bytes,
                None => fetch_snapshot(&self.agent, &self.url)?,
            },
        };
        let image = image::load_from_memory(&jpeg)
            .context("decode jpeg")?
            .into_rgb8();
        self.frame_count += 1;
        Ok(Some(Frame::new(image, self.frame_count)))
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_body(response)
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finds_jpeg_between_multipart_headers() {
        let mut buf = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let start = buf.len();
        buf.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buf.extend_from_slice(b"\r\n--frame\r\n");
        assert_eq!(find_jpeg_bounds(&buf), Some((start, start + 7)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00]), None);
    }

    #[test]
    fn mjpeg_stream_yields_frames_in_order() {
        let mut data = Vec::new();
        for marker in [1u8, 2u8] {
            data.extend_from_slice(b"--b\r\n\r\n");
            data.extend_from_slice(&[0xFF, 0xD8, marker, 0xFF, 0xD9]);
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(data)));
        assert_eq!(stream.read_next_jpeg().unwrap()[2], 1);
        assert_eq!(stream.read_next_jpeg().unwrap()[2], 2);
        assert!(stream.read_next_jpeg().is_err());
    }

    #[test]
    fn unreachable_camera_fails_to_open() {
        let mut source = HttpCameraSource::new("http://127.0.0.1:9/stream");
        assert!(source.open().is_err());
        assert!(source.read().unwrap().is_none());
    }
}
