//! Byte-at-a-time view of a [`TokenParser`].
//!
//! The token parser commits bytes in bursts (forced bytes, chosen tokens). The
//! byte parser keeps the committed buffer and a read cursor into it, so callers can
//! feed arbitrary byte slices and get a [`ParserError::ByteMismatch`] at the first
//! byte the grammar rejects.

use rustc_hash::FxHashMap;

use crate::error::{Error, ParserError};
use crate::grammar::Grammar;
use crate::interpreter::{FragmentCompiler, GrammarCompiler};
use crate::parser::capture::{Capture, CaptureData, CaptureMap};
use crate::parser::token::{GenData, ParserResponse, TokenParser};
use crate::tokenizer::ByteTokenizer;

pub struct ByteParser {
    parser: TokenParser,
    /// Every byte the grammar has committed to.
    bytes: Vec<u8>,
    /// Read cursor into `bytes`.
    pos: usize,
    gen_data: Option<GenData>,
    captures: CaptureMap<CaptureData, f64>,
}

impl ByteParser {
    /// Byte parser over the built-in fragment interpreter.
    pub fn new(grammar: &Grammar) -> Result<Self, Error> {
        Self::with_compiler(grammar, &FragmentCompiler::default(), b"", true)
    }

    pub fn with_compiler(
        grammar: &Grammar,
        compiler: &dyn GrammarCompiler,
        prompt: &[u8],
        ensure_bos_token: bool,
    ) -> Result<Self, Error> {
        let parser = TokenParser::new(grammar, &ByteTokenizer::new(), compiler, prompt, ensure_bos_token)?;
        Ok(Self::from_token_parser(parser))
    }

    /// Wrap a token parser whose token ids below 256 are single bytes.
    pub fn from_token_parser(parser: TokenParser) -> Self {
        Self {
            parser,
            bytes: Vec::new(),
            pos: 0,
            gen_data: None,
            captures: CaptureMap::new(),
        }
    }

    /// Match `input` against the grammar, committing new bytes as needed.
    ///
    /// An empty `input` still flushes bytes the grammar forces next.
    pub fn consume_bytes(&mut self, input: &[u8]) -> Result<(), Error> {
        let mut rest = input;
        loop {
            self.flush()?;

            let Some((&b, tail)) = rest.split_first() else {
                return Ok(());
            };

            if let Some(&expected) = self.bytes.get(self.pos) {
                if b != expected {
                    return Err(self.mismatch(b, vec![expected]));
                }
                self.pos += 1;
                rest = tail;
                continue;
            }

            // At the frontier: the byte becomes the next token.
            let allowed = match &self.gen_data {
                Some(gen) if gen.is_allowed(b as u32) => true,
                Some(_) => false,
                None => return Err(self.mismatch(b, Vec::new())),
            };
            if !allowed {
                let legal = self.valid_next_bytes();
                return Err(self.mismatch(b, legal));
            }
            self.parser.consume_token(b as u32);
            self.gen_data = None;
        }
    }

    /// True once every committed byte has been consumed and the grammar is done.
    pub fn matched(&mut self) -> Result<bool, Error> {
        if self.pos < self.bytes.len() {
            return Ok(false);
        }
        if !self.parser.done() {
            self.consume_bytes(&[])?;
        }
        Ok(self.pos == self.bytes.len() && self.parser.done())
    }

    /// Captured values and their log-probabilities.
    pub fn get_captures(
        &self,
    ) -> (
        &FxHashMap<String, Capture<CaptureData>>,
        &FxHashMap<String, Capture<f64>>,
    ) {
        (self.captures.values(), self.captures.log_probs())
    }

    pub fn captures(&self) -> &CaptureMap<CaptureData, f64> {
        &self.captures
    }

    /// Committed bytes so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes the parser would accept next, without consuming anything.
    pub fn valid_next_bytes(&self) -> Vec<u8> {
        if let Some(&b) = self.bytes.get(self.pos) {
            return vec![b];
        }
        match &self.gen_data {
            Some(gen) => gen
                .valid_next_tokens()
                .into_iter()
                .filter_map(|t| u8::try_from(t).ok())
                .collect(),
            None => Vec::new(),
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        while self.gen_data.is_none() && !self.parser.done() {
            let (gen_data, response) = self.parser.advance()?;
            self.merge_captures(&response);
            self.bytes.extend_from_slice(&response.new_bytes);
            self.gen_data = gen_data;
        }
        Ok(())
    }

    fn merge_captures(&mut self, response: &ParserResponse) {
        for (name, value, log_prob) in response.captures.iter() {
            match (value, log_prob) {
                (Capture::List(items), Capture::List(probs)) => {
                    for (item, &lp) in items.iter().zip(probs) {
                        self.captures
                            .record(name, CaptureData::from_bytes(item.clone()), lp, true);
                    }
                }
                (Capture::Scalar(v), Capture::Scalar(lp)) => {
                    self.captures
                        .record(name, CaptureData::from_bytes(v.clone()), *lp, false);
                }
                _ => tracing::warn!(name, "capture value and log-prob shapes differ"),
            }
        }
    }

    fn mismatch(&self, current_byte: u8, allowed_bytes: Vec<u8>) -> Error {
        ParserError::ByteMismatch {
            current_byte,
            allowed_bytes,
            consumed_bytes: self.bytes[..self.pos].to_vec(),
        }
        .into()
    }
}
