//! Reading extraction pipeline
//!
//! Composes decode, preprocessing, recognition, and assembly into one
//! request-scoped operation. The pipeline holds no mutable state: one
//! instance can serve concurrent uploads, each invocation owning its own
//! buffers.

use std::sync::Arc;

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::artifacts::ArtifactSink;
use crate::vision::{assemble, codec, preprocess, Reading, Recognition, RecognitionStrategy};

/// Why an upload could not be processed.
///
/// "Zero digits recognized" is deliberately absent: that is a valid empty
/// reading, not a failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Zero-length upload body; the client should retry with a real capture
    #[error("empty upload body")]
    EmptyInput,

    /// Bytes do not decode as a supported image format
    #[error("bytes do not decode as a supported image format: {0}")]
    InvalidImage(#[source] image::ImageError),

    /// Recognition model failed to initialize; fatal at startup, never
    /// raised per upload
    #[error("recognition model failed to initialize: {0}")]
    ModelLoad(anyhow::Error),
}

impl PipelineError {
    /// Stable machine-readable name for callers reporting failures
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmptyInput => "empty_input",
            PipelineError::InvalidImage(_) => "invalid_image",
            PipelineError::ModelLoad(_) => "model_load",
        }
    }
}

/// Result of one successful upload: the reading plus the frame geometry the
/// caller needs for its access log.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub reading: Reading,
    pub width: u32,
    pub height: u32,
}

/// Request-scoped reading extraction
pub struct Pipeline {
    strategy: Box<dyn RecognitionStrategy>,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl Pipeline {
    pub fn new(strategy: Box<dyn RecognitionStrategy>) -> Self {
        Self {
            strategy,
            sink: None,
        }
    }

    /// Attach a debug artifact sink receiving the most recent frame and, on
    /// the detection path, its annotated copy.
    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Process one uploaded image body into a reading.
    ///
    /// Decode failures abort immediately with a typed error. Recognition
    /// faults degrade to an empty reading: a blurry photo is a "no reading"
    /// event for the caller to log, not a system error.
    pub fn process_upload(&self, bytes: &[u8]) -> Result<UploadOutcome, PipelineError> {
        let frame = codec::decode_frame(bytes)?;
        let (width, height) = frame.dimensions();

        if let Some(sink) = &self.sink {
            sink.store_frame(&frame);
        }

        let prepared = if self.strategy.wants_binarized() {
            debug!("Binarizing frame for {}", self.strategy.name());
            DynamicImage::ImageLuma8(preprocess::binarize_frame(&frame))
        } else {
            DynamicImage::ImageRgb8(frame)
        };

        let recognition = match self.strategy.recognize(&prepared) {
            Ok(recognition) => recognition,
            Err(e) => {
                warn!(
                    "{} failed on this frame, degrading to empty reading: {:#}",
                    self.strategy.name(),
                    e
                );
                Recognition::default()
            }
        };

        if let Some(sink) = &self.sink {
            if let Some(annotated) = &recognition.annotated {
                sink.store_annotated(annotated);
            }
        }

        let reading = assemble(recognition.tokens);
        debug!(
            "Assembled {}-digit reading via {}",
            reading.digit_count(),
            self.strategy.name()
        );

        Ok(UploadOutcome {
            reading,
            width,
            height,
        })
    }
}
