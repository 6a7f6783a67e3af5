//! Frame normalization for the OCR path
//!
//! Reduces a color frame to a strictly two-valued black/white buffer:
//! grayscale conversion, a small blur to suppress sensor/JPEG noise, then an
//! Otsu global threshold. The detection strategy skips this stage entirely
//! since its model was trained on color imagery.

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::box_filter;
use tracing::debug;

/// Binarize a color frame for whole-line OCR.
///
/// Steps run in fixed order: luma grayscale, 3x3 box blur, Otsu threshold.
/// The result holds only the values 0 and 255.
pub fn binarize_frame(frame: &RgbImage) -> GrayImage {
    let gray = DynamicImage::ImageRgb8(frame.clone()).to_luma8();

    // 3x3 mean blur; radius 1 in each direction
    let blurred = box_filter(&gray, 1, 1);

    let level = otsu_level(&blurred);
    let binary = threshold(&blurred, level, ThresholdType::Binary);

    debug!(
        "Binarized {}x{} frame at Otsu level {}",
        binary.width(),
        binary.height(),
        level
    );

    binary
}
