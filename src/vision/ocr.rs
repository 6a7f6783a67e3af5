//! Whole-line OCR strategy
//!
//! Treats the binarized frame as a single line of text and runs a CRNN
//! recognizer (PaddleOCR-style, via ONNX Runtime) over it. Output is
//! constrained to the digit character set: non-digit characters are dropped
//! one by one rather than rejecting the whole result.

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView2};
use ort::value::TensorRef;
use tracing::debug;

use crate::vision::models::{ModelKind, ModelManager, OnnxSession};
use crate::vision::{DigitToken, Recognition, RecognitionStrategy};

/// Input height the recognition model normalizes to
const REC_HEIGHT: u32 = 48;
/// Widest input fed to the recognizer; wider frames are clamped
const REC_MAX_WIDTH: u32 = 640;

/// Single-line CRNN recognizer constrained to digits
pub struct LineOcrStrategy {
    session: OnnxSession,
    character_dict: Vec<String>,
}

impl LineOcrStrategy {
    /// Load the recognizer model and character dictionary.
    ///
    /// Both artifacts must already be present; call
    /// `ModelManager::ensure_for(StrategyKind::Ocr)` first.
    pub fn load(manager: &ModelManager) -> Result<Self> {
        let session = OnnxSession::new(&manager.model_path(ModelKind::Recognizer))?;

        let dict_path = manager.model_path(ModelKind::Dictionary);
        let character_dict: Vec<String> = std::fs::read_to_string(&dict_path)
            .with_context(|| format!("Failed to read character dictionary at {:?}", dict_path))?
            .lines()
            .map(String::from)
            .collect();

        if character_dict.is_empty() {
            return Err(anyhow!("Character dictionary at {:?} is empty", dict_path));
        }

        Ok(Self {
            session,
            character_dict,
        })
    }

    /// Resize to model height, normalize to [-1, 1], and lay out as NCHW.
    fn frame_to_tensor(frame: &RgbImage) -> Array4<f32> {
        let (width, height) = frame.dimensions();

        let target_width = ((width as f32 / height as f32) * REC_HEIGHT as f32) as u32;
        let target_width = target_width.clamp(REC_HEIGHT / 3, REC_MAX_WIDTH);

        let resized = image::imageops::resize(frame, target_width, REC_HEIGHT, FilterType::Triangle);

        let mut input = Array4::zeros((1, 3, REC_HEIGHT as usize, target_width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            // (x / 255 - 0.5) / 0.5 maps [0, 255] -> [-1, 1]
            input[[0, 0, y as usize, x as usize]] = r as f32 / 127.5 - 1.0;
            input[[0, 1, y as usize, x as usize]] = g as f32 / 127.5 - 1.0;
            input[[0, 2, y as usize, x as usize]] = b as f32 / 127.5 - 1.0;
        }
        input
    }
}

impl RecognitionStrategy for LineOcrStrategy {
    fn name(&self) -> &str {
        "line-ocr"
    }

    fn wants_binarized(&self) -> bool {
        true
    }

    fn recognize(&self, frame: &DynamicImage) -> Result<Recognition> {
        // The pipeline hands this strategy a binarized single-channel frame;
        // the model expects RGB, so the channel is replicated.
        let rgb = frame.to_rgb8();
        let tensor = Self::frame_to_tensor(&rgb);
        let tensor_ref = TensorRef::from_array_view(tensor.view())?;

        let (text, confidence) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![tensor_ref])?;

            let (output_shape, output_data) = outputs[0].try_extract_tensor::<f32>()?;
            if output_shape.len() != 3 {
                return Err(anyhow!("Unexpected recognizer output shape: {:?}", output_shape));
            }

            let seq_len = output_shape[1] as usize;
            let num_classes = output_shape[2] as usize;
            let preds = ArrayView2::from_shape((seq_len, num_classes), output_data)
                .map_err(|e| anyhow!("Recognizer output does not match its shape: {}", e))?;

            ctc_greedy_decode(preds, &self.character_dict)
        };

        debug!("Recognizer text: {:?}, mean confidence: {:.3}", text, confidence);

        Ok(Recognition::from_tokens(digit_tokens_from_text(&text)))
    }
}

/// Greedy CTC decode: argmax per step, collapse repeats, skip the blank
/// class at index 0. Dictionary entries are offset by one for the blank.
///
/// Returns the decoded text and the mean probability of the kept steps; the
/// confidence is informational only on this path.
fn ctc_greedy_decode(preds: ArrayView2<f32>, character_dict: &[String]) -> (String, f32) {
    const BLANK: usize = 0;

    let mut sequence_idx = Vec::new();
    let mut sequence_prob = Vec::new();

    for row in preds.outer_iter() {
        if let Some((idx, &prob)) = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        {
            sequence_idx.push(idx);
            sequence_prob.push(prob);
        }
    }

    let mut text = String::new();
    let mut kept_prob = Vec::new();

    for (i, &idx) in sequence_idx.iter().enumerate() {
        if idx == BLANK || (i > 0 && sequence_idx[i] == sequence_idx[i - 1]) {
            continue;
        }
        if let Some(entry) = character_dict.get(idx - 1) {
            text.push_str(entry);
            kept_prob.push(sequence_prob[i]);
        }
    }

    let confidence = if kept_prob.is_empty() {
        0.0
    } else {
        kept_prob.iter().sum::<f32>() / kept_prob.len() as f32
    };

    (text, confidence)
}

/// Keep only digit characters from recognizer output, in reading order.
///
/// Each accepted character becomes a token whose position is its rank; the
/// recognizer exposes no per-character confidence, so every token carries a
/// fixed score of 1.0 and the assembler's gate is a no-op on this path.
pub fn digit_tokens_from_text(text: &str) -> Vec<DigitToken> {
    text.chars()
        .filter(char::is_ascii_digit)
        .enumerate()
        .map(|(rank, c)| DigitToken {
            value: c as u8 - b'0',
            position: rank as f32,
            score: 1.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_digit_tokens_discard_non_digits() {
        let tokens = digit_tokens_from_text("12b3\n");
        assert_eq!(
            tokens.iter().map(|t| t.value).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            tokens.iter().map(|t| t.position).collect::<Vec<_>>(),
            vec![0.0, 1.0, 2.0]
        );
        assert!(tokens.iter().all(|t| t.score == 1.0));
    }

    #[test]
    fn test_digit_tokens_empty_text() {
        assert!(digit_tokens_from_text("").is_empty());
        assert!(digit_tokens_from_text("no digits here\n").is_empty());
    }

    #[test]
    fn test_digit_tokens_assemble_in_order() {
        let reading = crate::vision::assemble(digit_tokens_from_text("12b3\n"));
        assert_eq!(reading.as_str(), "123");
    }

    /// Logits where each row puts all its mass on one class.
    fn one_hot_preds(steps: &[usize], num_classes: usize) -> Array2<f32> {
        let mut preds = Array2::zeros((steps.len(), num_classes));
        for (i, &class) in steps.iter().enumerate() {
            preds[[i, class]] = 0.9;
        }
        preds
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dict: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();

        // blank, "1", "1", blank, "2", "2", "3" -> "123"
        let preds = one_hot_preds(&[0, 1, 1, 0, 2, 2, 3], 4);
        let (text, confidence) = ctc_greedy_decode(preds.view(), &dict);

        assert_eq!(text, "123");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_repeat_separated_by_blank_survives() {
        let dict: Vec<String> = ["7"].iter().map(|s| s.to_string()).collect();

        // "7", blank, "7" decodes to two sevens
        let preds = one_hot_preds(&[1, 0, 1], 2);
        let (text, _) = ctc_greedy_decode(preds.view(), &dict);

        assert_eq!(text, "77");
    }

    #[test]
    fn test_ctc_all_blanks_yields_empty() {
        let dict: Vec<String> = ["0"].iter().map(|s| s.to_string()).collect();

        let preds = one_hot_preds(&[0, 0, 0], 2);
        let (text, confidence) = ctc_greedy_decode(preds.view(), &dict);

        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }
}
