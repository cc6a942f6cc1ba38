#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorVariant, LeafDetector};
use crate::detect::result::DetectionCandidate;
use crate::geometry::{clamp_and_validate, DETECTED_MIN_SIZE};

/// SSD-style input scaling: `(pixel - MEAN) * SCALE`.
const INPUT_MEAN: f32 = 127.5;
const INPUT_SCALE: f32 = 0.007_843;

/// Values per detection row: image id, class id, confidence, x1, y1, x2, y2.
const SSD_ROW_LEN: usize = 7;

/// Tract-based single-shot leaf detector.
///
/// The network takes a fixed square input; frames are resized before
/// inference and the normalized output boxes are scaled back against the
/// original frame dimensions.
pub struct TractLeafBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    leaf_class_id: u32,
}

impl TractLeafBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.5,
            leaf_class_id: 1,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override which output class counts as "leaf".
    pub fn with_leaf_class(mut self, class_id: u32) -> Self {
        self.leaf_class_id = class_id;
        self
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let resized = imageops::resize(frame, self.input_size, self.input_size, FilterType::Triangle);
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let pixel = resized.get_pixel(x as u32, y as u32);
            (pixel.0[c] as f32 - INPUT_MEAN) * INPUT_SCALE
        });
        input.into_tensor()
    }

    fn extract_leaves(
        &self,
        outputs: TVec<TValue>,
        frame_w: u32,
        frame_h: u32,
    ) -> Result<Vec<DetectionCandidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;
        if values.len() % SSD_ROW_LEN != 0 {
            return Err(anyhow!(
                "model output length {} is not a multiple of {}",
                values.len(),
                SSD_ROW_LEN
            ));
        }

        let mut leaves = Vec::new();
        for row in values.chunks_exact(SSD_ROW_LEN) {
            let class_id = row[1];
            let confidence = row[2];
            if !(confidence > self.confidence_threshold) {
                continue;
            }
            if class_id.round() as i64 != self.leaf_class_id as i64 {
                continue;
            }
            let scale = |v: f32, dim: u32| (v * dim as f32) as i64;
            let bbox = clamp_and_validate(
                scale(row[3], frame_w),
                scale(row[4], frame_h),
                scale(row[5], frame_w),
                scale(row[6], frame_h),
                frame_w,
                frame_h,
                DETECTED_MIN_SIZE,
                DETECTED_MIN_SIZE,
            );
            if let Ok(bbox) = bbox {
                leaves.push(DetectionCandidate::new(bbox, confidence));
            }
        }
        Ok(leaves)
    }
}

impl LeafDetector for TractLeafBackend {
    fn name(&self) -> &'static str {
        "tract-ssd"
    }

    fn variant(&self) -> DetectorVariant {
        DetectorVariant::Model
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectionCandidate>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_leaves(outputs, frame.width(), frame.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
