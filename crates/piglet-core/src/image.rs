//! The binary program image: a flat, read-only array of 32-bit words.

use crate::{PigletError, Word};

/// An immutable, indexable view over a program's instruction stream.
///
/// Produced once by [`Program::from_bytes`] and never mutated for the
/// lifetime of the VM; the stack and memory the VM executes against are
/// entirely separate from this.
#[derive(Debug, Clone)]
pub struct Program {
    words: Vec<Word>,
}

impl Program {
    /// Builds a program directly from decoded words, bypassing byte
    /// decoding. Mainly useful for tests and for the assembler, which
    /// already works in words.
    #[must_use]
    pub fn from_words(words: Vec<Word>) -> Self {
        Self { words }
    }

    /// Decodes a byte stream as little-endian signed 32-bit words.
    ///
    /// # Errors
    /// Returns [`PigletError::MalformedImage`] if the length is not a
    /// multiple of 4 or the image is empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PigletError> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(PigletError::MalformedImage {
                len: bytes.len(),
            });
        }
        let words = bytes
            .chunks_exact(4)
            .map(|c| Word::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        tracing::debug!(word_count = bytes.len() / 4, "loaded program image");
        Ok(Self { words })
    }

    /// Encodes the program back to its little-endian byte form (the inverse
    /// of [`Program::from_bytes`]); used by the assembler's writer and by
    /// round-trip tests.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 4);
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The word at `offset`, or `None` if it is out of range.
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<Word> {
        self.words.get(offset).copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Word] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_image() {
        assert!(matches!(
            Program::from_bytes(&[]),
            Err(PigletError::MalformedImage { len: 0 })
        ));
    }

    #[test]
    fn rejects_length_not_multiple_of_four() {
        assert!(matches!(
            Program::from_bytes(&[1, 2, 3]),
            Err(PigletError::MalformedImage { .. })
        ));
    }

    #[test]
    fn decodes_little_endian_words() {
        // PUSHI 7 as two words: [0, 7]
        let bytes = [0, 0, 0, 0, 7, 0, 0, 0];
        let program = Program::from_bytes(&bytes).unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.get(0), Some(0));
        assert_eq!(program.get(1), Some(7));
        assert_eq!(program.get(2), None);
    }

    #[test]
    fn byte_roundtrip() {
        let bytes = [0, 0, 0, 0, 7, 0, 0, 0, 24, 0, 0, 0, 23, 0, 0, 0];
        let program = Program::from_bytes(&bytes).unwrap();
        assert_eq!(program.to_bytes(), bytes);
    }

    proptest::proptest! {
        #[test]
        fn encode_then_decode_is_lossless_for_any_words(
            words in proptest::collection::vec(proptest::prelude::any::<Word>(), 1..64)
        ) {
            let program = Program::from_words(words.clone());
            let decoded = Program::from_bytes(&program.to_bytes()).unwrap();
            proptest::prop_assert_eq!(decoded.as_slice(), words.as_slice());
        }
    }
}
