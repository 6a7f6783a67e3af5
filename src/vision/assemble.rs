//! Reading assembly
//!
//! Orders recognized digits left-to-right and concatenates them into the
//! final reading string. Detectors return boxes in arbitrary order, so the
//! sort here is what guarantees reading order regardless of which strategy
//! produced the tokens.

use crate::vision::DigitToken;

/// The final ordered digit string extracted from one frame.
///
/// An empty reading is a valid outcome ("no digits visible"), distinct from a
/// decode or model failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    digits: String,
}

impl Reading {
    pub fn empty() -> Self {
        Self {
            digits: String::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.digits
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn digit_count(&self) -> usize {
        self.digits.len()
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digits)
    }
}

/// Assemble tokens into a reading.
///
/// Tokens are stably sorted by `position` ascending (ties keep insertion
/// order) and their values concatenated. An empty token list yields an empty
/// reading.
pub fn assemble(mut tokens: Vec<DigitToken>) -> Reading {
    if tokens.is_empty() {
        return Reading::empty();
    }

    // Vec::sort_by is stable; NaN positions never occur but would sort as equal
    tokens.sort_by(|a, b| {
        a.position
            .partial_cmp(&b.position)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let digits = tokens
        .iter()
        .map(|t| char::from(b'0' + t.value.min(9)))
        .collect();

    Reading { digits }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: u8, position: f32, score: f32) -> DigitToken {
        DigitToken {
            value,
            position,
            score,
        }
    }

    #[test]
    fn test_empty_tokens_yield_empty_reading() {
        let reading = assemble(vec![]);
        assert!(reading.is_empty());
        assert_eq!(reading.digit_count(), 0);
    }

    #[test]
    fn test_sorts_by_position() {
        let tokens = vec![
            token(1, 50.0, 0.9),
            token(0, 10.0, 0.95),
            token(2, 90.0, 0.4),
        ];
        assert_eq!(assemble(tokens).as_str(), "012");
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let tokens = vec![token(7, 25.0, 1.0), token(3, 25.0, 1.0)];
        assert_eq!(assemble(tokens).as_str(), "73");
    }

    #[test]
    fn test_resorting_is_idempotent() {
        let tokens = vec![
            token(4, 30.0, 1.0),
            token(9, 5.0, 1.0),
            token(1, 60.0, 1.0),
        ];

        let first = assemble(tokens);

        // Feed already-ordered tokens back through: order must not change
        let ordered: Vec<DigitToken> = first
            .as_str()
            .bytes()
            .enumerate()
            .map(|(i, b)| token(b - b'0', i as f32, 1.0))
            .collect();
        let second = assemble(ordered);

        assert_eq!(first.as_str(), second.as_str());
    }

    #[test]
    fn test_display_matches_digits() {
        let tokens = vec![token(5, 0.0, 1.0), token(8, 1.0, 1.0)];
        assert_eq!(assemble(tokens).to_string(), "58");
    }
}
