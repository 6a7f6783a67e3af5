//! Detection visualization
//!
//! Draws the surviving detection boxes (and their digit labels, when a font
//! is available) onto a copy of the input frame. The result is a diagnostic
//! artifact for the debug sink, never part of the reading contract.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::debug;

use crate::vision::detect::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 48, 48]);
const LABEL_SCALE: f32 = 18.0;

/// Try to load a label font from common system locations.
///
/// Returns None when no font resolves; callers then draw boxes without
/// labels.
pub fn system_font() -> Option<FontVec> {
    let font_paths = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/System/Library/Fonts/Helvetica.ttc",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];

    for path in font_paths {
        if let Ok(data) = std::fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec(data) {
                debug!("Loaded label font from {}", path);
                return Some(font);
            }
        }
    }

    debug!("No system label font found; annotations will omit labels");
    None
}

/// Render boxes and labels onto a copy of the frame.
pub fn draw_detections(
    frame: &RgbImage,
    detections: &[Detection],
    font: Option<&FontVec>,
) -> RgbImage {
    let mut annotated = frame.clone();
    let (width, height) = annotated.dimensions();

    for d in detections {
        let x = (d.x1.max(0.0) as i32).min(width.saturating_sub(1) as i32);
        let y = (d.y1.max(0.0) as i32).min(height.saturating_sub(1) as i32);
        let w = ((d.x2 - d.x1).max(1.0) as u32).min(width - x as u32);
        let h = ((d.y2 - d.y1).max(1.0) as u32).min(height - y as u32);

        draw_hollow_rect_mut(&mut annotated, Rect::at(x, y).of_size(w.max(1), h.max(1)), BOX_COLOR);

        if let Some(font) = font {
            let label = format!("{} {:.2}", d.class_id, d.score);
            let label_y = (y - LABEL_SCALE as i32).max(0);
            draw_text_mut(
                &mut annotated,
                LABEL_COLOR,
                x,
                label_y,
                PxScale::from(LABEL_SCALE),
                font,
                &label,
            );
        }
    }

    annotated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_detection() -> Detection {
        Detection {
            x1: 4.0,
            y1: 4.0,
            x2: 14.0,
            y2: 20.0,
            class_id: 3,
            score: 0.88,
        }
    }

    #[test]
    fn test_annotation_does_not_mutate_input() {
        let frame = RgbImage::from_pixel(32, 32, Rgb([50, 50, 50]));
        let before = frame.clone();

        let _ = draw_detections(&frame, &[sample_detection()], None);
        assert_eq!(frame.as_raw(), before.as_raw());
    }

    #[test]
    fn test_annotation_draws_box_outline() {
        let frame = RgbImage::from_pixel(32, 32, Rgb([50, 50, 50]));
        let annotated = draw_detections(&frame, &[sample_detection()], None);

        // Top-left corner of the hollow rect carries the box color
        assert_eq!(annotated.get_pixel(4, 4).0, BOX_COLOR.0);
        // Interior is untouched
        assert_eq!(annotated.get_pixel(9, 12).0, [50, 50, 50]);
    }

    #[test]
    fn test_out_of_bounds_box_is_clamped() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        let oversized = Detection {
            x1: -5.0,
            y1: -5.0,
            x2: 100.0,
            y2: 100.0,
            class_id: 1,
            score: 0.5,
        };

        // Must not panic
        let annotated = draw_detections(&frame, &[oversized], None);
        assert_eq!(annotated.dimensions(), (16, 16));
    }

    #[test]
    fn test_empty_detections_yield_unchanged_copy() {
        let frame = RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]));
        let annotated = draw_detections(&frame, &[], None);
        assert_eq!(annotated.as_raw(), frame.as_raw());
    }
}
