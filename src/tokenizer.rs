//! Tokenizer boundary.
//!
//! The parsers only need encode/decode, the optional BOS byte string and the id of
//! the end-of-sequence token. [`ByteTokenizer`] is the byte-level vocabulary used by
//! [`crate::parser::ByteParser`]: ids 0–255 are raw bytes and id 256 is EOS.

/// End-of-sequence token id of [`ByteTokenizer`].
pub const BYTE_EOS_TOKEN: u32 = 256;

/// Vocabulary size of [`ByteTokenizer`].
pub const BYTE_VOCAB_SIZE: usize = 257;

pub trait Tokenizer: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> Vec<u32>;

    /// Decode token ids back into bytes. Special tokens decode to nothing.
    fn decode(&self, tokens: &[u32]) -> Vec<u8>;

    /// Bytes of the beginning-of-sequence token, if the model uses one.
    fn bos_token(&self) -> Option<&[u8]>;

    fn eos_token_id(&self) -> u32;

    fn vocab_size(&self) -> usize;
}

/// One token per byte, plus an end-of-sequence token.
#[derive(Debug, Clone, Default)]
pub struct ByteTokenizer {
    bos_token: Option<Vec<u8>>,
}

impl ByteTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A byte tokenizer whose prompts start with `bos`.
    pub fn with_bos(bos: impl Into<Vec<u8>>) -> Self {
        Self {
            bos_token: Some(bos.into()),
        }
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, bytes: &[u8]) -> Vec<u32> {
        bytes.iter().map(|&b| b as u32).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Vec<u8> {
        tokens
            .iter()
            .filter(|&&t| t < BYTE_EOS_TOKEN)
            .map(|&t| t as u8)
            .collect()
    }

    fn bos_token(&self) -> Option<&[u8]> {
        self.bos_token.as_deref()
    }

    fn eos_token_id(&self) -> u32 {
        BYTE_EOS_TOKEN
    }

    fn vocab_size(&self) -> usize {
        BYTE_VOCAB_SIZE
    }
}
