//! Per-digit object-detection strategy
//!
//! Runs a trained detector (ONNX export with fused box decoding) over the
//! color frame, localizing each digit glyph and classifying it 0-9. Low-score
//! boxes are discarded, not reported as errors; overlapping same-class boxes
//! are optionally suppressed score-first before assembly.

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;
use ort::value::TensorRef;
use tracing::debug;

use crate::vision::annotate;
use crate::vision::models::{ModelKind, ModelManager, OnnxSession};
use crate::vision::{DigitToken, Recognition, RecognitionStrategy};

/// Square input size the detector was exported with
const DET_INPUT_SIZE: u32 = 640;

/// A localized, classified digit box in original-image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Predicted digit class (0-9)
    pub class_id: u8,
    /// Confidence score (0.0 - 1.0)
    pub score: f32,
}

/// Tuning for the detection strategy
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Detections below this score are silently dropped
    pub confidence_threshold: f32,
    /// Suppress overlapping same-class boxes, highest score first
    pub overlap_suppression: bool,
    /// IoU above which two same-class boxes count as duplicates
    pub overlap_iou: f32,
    /// Render an annotated copy of the frame for the debug sink
    pub annotate: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            overlap_suppression: true,
            overlap_iou: 0.45,
            annotate: true,
        }
    }
}

/// Digit detector backed by an ONNX session
pub struct DigitDetectorStrategy {
    session: OnnxSession,
    config: DetectorConfig,
    label_font: Option<ab_glyph::FontVec>,
}

impl DigitDetectorStrategy {
    /// Load the detector model.
    ///
    /// The artifact must already be present; call
    /// `ModelManager::ensure_for(StrategyKind::Detection)` first.
    pub fn load(manager: &ModelManager, config: DetectorConfig) -> Result<Self> {
        let session = OnnxSession::new(&manager.model_path(ModelKind::Detector))?;
        let label_font = config.annotate.then(annotate::system_font).flatten();

        Ok(Self {
            session,
            config,
            label_font,
        })
    }

    /// Resize into the square model input (top-left aligned, zero padded)
    /// and return the tensor plus the scale used, for box un-mapping.
    fn frame_to_tensor(frame: &RgbImage) -> (Array4<f32>, f32) {
        let (width, height) = frame.dimensions();
        let scale = DET_INPUT_SIZE as f32 / width.max(height) as f32;
        let new_w = ((width as f32 * scale) as u32).max(1);
        let new_h = ((height as f32 * scale) as u32).max(1);

        let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);

        let mut input = Array4::zeros((1, 3, DET_INPUT_SIZE as usize, DET_INPUT_SIZE as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            input[[0, 0, y as usize, x as usize]] = r as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = g as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = b as f32 / 255.0;
        }

        (input, scale)
    }
}

impl RecognitionStrategy for DigitDetectorStrategy {
    fn name(&self) -> &str {
        "digit-detector"
    }

    fn recognize(&self, frame: &DynamicImage) -> Result<Recognition> {
        let rgb = frame.to_rgb8();
        let (tensor, scale) = Self::frame_to_tensor(&rgb);
        let tensor_ref = TensorRef::from_array_view(tensor.view())?;

        let mut detections = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![tensor_ref])?;
            let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            parse_detector_output(shape, data, scale)?
        };

        if self.config.overlap_suppression {
            let before = detections.len();
            detections = suppress_overlaps(detections, self.config.overlap_iou);
            if detections.len() < before {
                debug!(
                    "Overlap suppression dropped {} duplicate boxes",
                    before - detections.len()
                );
            }
        }

        let tokens = tokens_from_detections(&detections, self.config.confidence_threshold);
        debug!(
            "Detector produced {} boxes, {} above threshold {:.2}",
            detections.len(),
            tokens.len(),
            self.config.confidence_threshold
        );

        let annotated = self.config.annotate.then(|| {
            let confident: Vec<Detection> = detections
                .iter()
                .filter(|d| d.score >= self.config.confidence_threshold)
                .copied()
                .collect();
            annotate::draw_detections(&rgb, &confident, self.label_font.as_ref())
        });

        Ok(Recognition { tokens, annotated })
    }
}

/// Decode raw detector output rows `[x1, y1, x2, y2, score, class]` into
/// detections in original-image pixels.
///
/// Accepts `[1, N, 6]` or `[N, 6]` layouts. Zero-score padding rows and
/// classes outside 0-9 are skipped; nothing here invents a digit.
pub fn parse_detector_output(shape: &[i64], data: &[f32], scale: f32) -> Result<Vec<Detection>> {
    let row_len = match shape {
        [1, _, 6] | [_, 6] => 6usize,
        _ => return Err(anyhow!("Unexpected detector output shape: {:?}", shape)),
    };

    let mut detections = Vec::new();

    for row in data.chunks_exact(row_len) {
        let score = row[4];
        if score <= 0.0 {
            continue;
        }

        let class = row[5].round();
        if !(0.0..=9.0).contains(&class) {
            debug!("Skipping detection with out-of-range class {}", class);
            continue;
        }

        detections.push(Detection {
            x1: row[0] / scale,
            y1: row[1] / scale,
            x2: row[2] / scale,
            y2: row[3] / scale,
            class_id: class as u8,
            score: score.clamp(0.0, 1.0),
        });
    }

    Ok(detections)
}

/// Map detections at or above the confidence threshold to digit tokens.
///
/// Filtered boxes are discarded silently; the token's ordering key is the
/// box's left edge.
pub fn tokens_from_detections(detections: &[Detection], threshold: f32) -> Vec<DigitToken> {
    detections
        .iter()
        .filter(|d| d.score >= threshold)
        .map(|d| DigitToken {
            value: d.class_id,
            position: d.x1,
            score: d.score,
        })
        .collect()
}

/// Score-ranked suppression of overlapping same-class boxes.
///
/// The highest-scoring box of each overlapping same-class cluster survives;
/// a detector that already deduplicates internally passes through unchanged.
pub fn suppress_overlaps(mut detections: Vec<Detection>, iou_limit: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let duplicate = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_limit);
        if !duplicate {
            kept.push(candidate);
        }
    }

    kept
}

/// Intersection-over-union of two boxes
fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = ix * iy;

    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;

    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}
