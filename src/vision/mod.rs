//! Vision Layer
//!
//! Extracts a numeric meter reading from an uploaded photo.
//! Two interchangeable recognition strategies sit behind one trait:
//! - Whole-line CRNN OCR over a binarized frame (ONNX Runtime)
//! - Per-digit object detection over the color frame (ONNX Runtime)

pub mod annotate;
pub mod assemble;
pub mod codec;
pub mod detect;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod preprocess;

use anyhow::Result;
use image::{DynamicImage, RgbImage};

pub use assemble::{assemble, Reading};
pub use detect::{DetectorConfig, DigitDetectorStrategy};
pub use models::{ModelKind, ModelManager, OnnxSession};
pub use ocr::LineOcrStrategy;
pub use pipeline::{Pipeline, PipelineError, UploadOutcome};

/// Recognition strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Per-digit object detection (recommended for segmented meter displays)
    #[default]
    Detection,
    /// Whole-line digit OCR over a binarized frame
    Ocr,
}

/// A recognized digit with its horizontal position and confidence.
///
/// `position` is the left edge of the detection box in original-image pixels,
/// or the character's rank in reading order when produced by the OCR strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitToken {
    /// Digit value (0-9)
    pub value: u8,
    /// Horizontal ordering key
    pub position: f32,
    /// Confidence score (0.0 - 1.0)
    pub score: f32,
}

/// Output of one strategy invocation on one frame.
#[derive(Debug, Default)]
pub struct Recognition {
    /// Recognized digits, in whatever order the strategy produced them
    pub tokens: Vec<DigitToken>,
    /// Annotated copy of the frame, when the strategy localizes digits spatially
    pub annotated: Option<RgbImage>,
}

impl Recognition {
    /// A recognition with tokens only and no side artifact.
    pub fn from_tokens(tokens: Vec<DigitToken>) -> Self {
        Self {
            tokens,
            annotated: None,
        }
    }
}

/// Every recognition backend implements this.
///
/// `recognize` receives the decoded frame by reference; the pipeline has
/// already binarized it when `wants_binarized` returns true, so a strategy
/// never re-runs preprocessing itself. "Zero digits found" is a normal
/// empty-token result, not an error.
pub trait RecognitionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the pipeline should binarize the frame before recognition.
    fn wants_binarized(&self) -> bool {
        false
    }

    fn recognize(&self, frame: &DynamicImage) -> Result<Recognition>;
}
