//! Upload decoding
//!
//! Turns the raw bytes of an uploaded photo into an in-memory pixel buffer.
//! The decode is forced to color: both strategies start from a 3-channel
//! frame, and binarization (when needed) happens afterwards in `preprocess`.

use image::RgbImage;
use tracing::debug;

use crate::vision::pipeline::PipelineError;

/// Decode an uploaded image body into an RGB pixel buffer.
///
/// Fails with `EmptyInput` for a zero-length body and `InvalidImage` when the
/// bytes do not parse as a supported image format (corrupt or truncated
/// uploads included). On success the buffer has 3 channels and positive
/// dimensions.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let frame = image::load_from_memory(bytes)
        .map_err(PipelineError::InvalidImage)?
        .to_rgb8();

    debug!(
        "Decoded upload: {}x{} from {} bytes",
        frame.width(),
        frame.height(),
        bytes.len()
    );

    Ok(frame)
}
