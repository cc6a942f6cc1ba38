//! Disease classification capability.
//!
//! The classifier is an opaque service: it receives JPEG bytes and answers
//! with a disease label and a 0..100 severity. Everything else in its reply is
//! carried along in `raw_payload` without interpretation.

mod http;

pub use http::HttpClassifier;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub disease: Option<String>,
    pub severity: f32,
    pub raw_payload: Value,
}

impl ClassificationResult {
    /// Interpret a classifier reply.
    ///
    /// A missing or non-numeric severity reads as 0; values are clamped to
    /// 0..=100. The reply must be a JSON object.
    pub fn from_payload(payload: Value) -> Result<Self, ClassifyError> {
        let obj = payload.as_object().ok_or_else(|| {
            ClassifyError::InvalidResponse("classifier reply is not a JSON object".to_string())
        })?;
        let disease = match obj.get("disease") {
            Some(Value::String(name)) => Some(name.clone()),
            _ => None,
        };
        let severity = obj
            .get("severity")
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);
        Ok(Self {
            disease,
            severity,
            raw_payload: payload,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClassifyError {
    /// The service answered with a non-success HTTP status.
    Status(u16),
    /// The request never completed (connect, timeout, reset).
    Transport(String),
    InvalidResponse(String),
    Encode(String),
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifyError::Status(code) => write!(f, "classifier returned status {}", code),
            ClassifyError::Transport(msg) => write!(f, "classifier unreachable: {}", msg),
            ClassifyError::InvalidResponse(msg) => write!(f, "invalid classifier reply: {}", msg),
            ClassifyError::Encode(msg) => write!(f, "failed to encode crop: {}", msg),
        }
    }
}

impl std::error::Error for ClassifyError {}

pub trait Classifier: Send + Sync {
    fn classify(&self, jpeg: &[u8]) -> Result<ClassificationResult, ClassifyError>;
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ClassifyError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| ClassifyError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_disease_and_severity() {
        let result = ClassificationResult::from_payload(json!({
            "disease": "early_blight",
            "severity": 42.5,
            "class": "infected"
        }))
        .unwrap();
        assert_eq!(result.disease.as_deref(), Some("early_blight"));
        assert_eq!(result.severity, 42.5);
        assert_eq!(result.raw_payload["class"], "infected");
    }

    #[test]
    fn missing_severity_reads_as_zero_and_out_of_range_is_clamped() {
        let result = ClassificationResult::from_payload(json!({"disease": null})).unwrap();
        assert_eq!(result.disease, None);
        assert_eq!(result.severity, 0.0);

        let result = ClassificationResult::from_payload(json!({"severity": 140})).unwrap();
        assert_eq!(result.severity, 100.0);
    }

    #[test]
    fn non_object_reply_is_invalid() {
        assert!(matches!(
            ClassificationResult::from_payload(json!([1, 2, 3])),
            Err(ClassifyError::InvalidResponse(_))
        ));
    }

    #[test]
    fn encodes_jpeg_with_soi_marker() {
        let img = RgbImage::from_pixel(16, 16, image::Rgb([10, 180, 20]));
        let bytes = encode_jpeg(&img, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
