use std::io::Read;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use super::{ClassificationResult, Classifier, ClassifyError};
use crate::config::ClassifierSettings;

const MAX_REPLY_BYTES: u64 = 1024 * 1024;

/// Classifier reached over HTTP as a multipart upload.
///
/// The crop is posted as form field `image`. The agent carries a request
/// timeout so an unreachable service bounds how long a batch can stall.
pub struct HttpClassifier {
    agent: ureq::Agent,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.into(),
        }
    }

    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        Self::new(settings.url.clone(), settings.timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Classifier for HttpClassifier {
    fn classify(&self, jpeg: &[u8]) -> Result<ClassificationResult, ClassifyError> {
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, "image", "leaf.jpg", "image/jpeg", jpeg);
        let response = self
            .agent
            .post(&self.url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => ClassifyError::Status(code),
                ureq::Error::Transport(t) => ClassifyError::Transport(t.to_string()),
            })?;
        if response.status() != 200 {
            return Err(ClassifyError::Status(response.status()));
        }

        let mut raw = String::new();
        response
            .into_reader()
            .take(MAX_REPLY_BYTES)
            .read_to_string(&mut raw)
            .map_err(|e| ClassifyError::Transport(format!("read reply: {}", e)))?;
        let payload: Value = serde_json::from_str(&raw)
            .map_err(|e| ClassifyError::InvalidResponse(e.to_string()))?;
        ClassificationResult::from_payload(payload)
    }
}

fn multipart_boundary() -> String {
    let token: u64 = rand::thread_rng().gen();
    format!("leafguard-{:016x}", token)
}

fn multipart_body(
    boundary: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_frames_the_payload() {
        let body = multipart_body("XYZ", "image", "leaf.jpg", "image/jpeg", b"\xFF\xD8abc\xFF\xD9");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\n"));
        assert!(text.contains("name=\"image\"; filename=\"leaf.jpg\""));
        assert!(text.contains("Content-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with("\r\n--XYZ--\r\n"));
    }

    #[test]
    fn boundaries_differ_between_requests() {
        assert_ne!(multipart_boundary(), multipart_boundary());
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        // Port 9 (discard) on localhost is normally closed.
        let classifier = HttpClassifier::new("http://127.0.0.1:9/api", Duration::from_millis(500));
        match classifier.classify(b"\xFF\xD8\xFF\xD9") {
            Err(ClassifyError::Transport(_)) => {}
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
