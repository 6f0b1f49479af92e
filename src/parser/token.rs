//! Token parser: drives a grammar interpreter one step at a time.
//!
//! Every [`TokenParser::advance`] forwards the pending token delta (`backtrack`
//! plus `ff_tokens`) to the interpreter and gets back either a mask, in which case
//! the caller must pick a token and hand it to [`TokenParser::consume_token`], or a
//! new delta of grammar-forced tokens. Mixing the two is an interpreter bug and
//! panics.

use crate::bitmask;
use crate::error::Error;
use crate::grammar::Grammar;
use crate::interpreter::{split_capture_name, GrammarCompiler, GrammarInterpreter, ProgressEvent, StepReport};
use crate::parser::capture::CaptureMap;
use crate::tokenizer::Tokenizer;

/// Snapshot of the parser between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserState {
    /// Every token of the sequence so far, prompt included.
    pub tokens: Vec<u32>,
    /// Tokens to replay to the interpreter on the next step.
    pub ff_tokens: Vec<u32>,
    /// Trailing tokens the interpreter retracted.
    pub backtrack: usize,
    pub done: bool,
}

impl ParserState {
    /// The state after the caller chose `token`.
    ///
    /// # Panics
    ///
    /// If the parser is done or still has a fast-forward/backtrack delta pending.
    pub fn with_token(&self, token: u32) -> ParserState {
        assert!(!self.done, "consume_token called on a finished parser");
        assert_eq!(self.backtrack, 0, "consume_token called with a pending backtrack");
        assert!(
            self.ff_tokens.is_empty(),
            "consume_token called with pending fast-forward tokens {:?}",
            self.ff_tokens
        );
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        ParserState {
            tokens,
            ff_tokens: vec![token],
            backtrack: 0,
            done: false,
        }
    }
}

/// A request for the caller to choose the next token.
#[derive(Debug, Clone, PartialEq)]
pub struct GenData {
    /// Token context so far.
    pub tokens: Vec<u32>,
    /// Legal next tokens, one bit per vocabulary entry (see [`crate::bitmask`]).
    pub mask: Vec<u32>,
    pub temperature: f32,
}

impl GenData {
    /// Legal next token ids in ascending order.
    pub fn valid_next_tokens(&self) -> Vec<u32> {
        bitmask::iter_allowed(&self.mask).collect()
    }

    pub fn is_allowed(&self, token: u32) -> bool {
        bitmask::get_bit(&self.mask, token as usize)
    }
}

/// What one [`TokenParser::advance`] produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserResponse {
    pub new_bytes: Vec<u8>,
    pub new_token_count: usize,
    /// Mean log-probability over the text fragments of the step.
    ///
    /// Averaging fragment log-probs is an approximation; interpreters normally
    /// report at most one text fragment per step.
    pub new_bytes_prob: f64,
    /// True when any text fragment of the step was chosen by the model.
    pub is_generated: bool,
    /// Capture groups with their log-probabilities.
    pub captures: CaptureMap<Vec<u8>, f64>,
}

impl ParserResponse {
    /// Reduce an interpreter progress log.
    pub fn from_progress(progress: &[ProgressEvent]) -> Self {
        let mut response = ParserResponse::default();
        let mut text_entries = 0usize;

        for event in progress {
            match event {
                ProgressEvent::Capture {
                    name,
                    bytes,
                    log_prob,
                } => {
                    let (name, list_append) = split_capture_name(name);
                    response
                        .captures
                        .record(name, bytes.clone(), *log_prob, list_append);
                    response.is_generated = true;
                }
                ProgressEvent::Text {
                    bytes,
                    num_tokens,
                    log_prob,
                    is_generated,
                } => {
                    response.new_bytes.extend_from_slice(bytes);
                    response.new_token_count += num_tokens;
                    response.new_bytes_prob += log_prob;
                    response.is_generated |= is_generated;
                    text_entries += 1;
                }
                ProgressEvent::Other => {
                    tracing::warn!("ignoring unrecognized progress event");
                }
            }
        }

        if text_entries > 0 {
            response.new_bytes_prob /= text_entries as f64;
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Token parser
// ---------------------------------------------------------------------------

pub struct TokenParser {
    interpreter: Box<dyn GrammarInterpreter>,
    state: ParserState,
}

impl TokenParser {
    /// Compile `grammar` and prime the interpreter with `prompt`.
    pub fn new(
        grammar: &Grammar,
        tokenizer: &dyn Tokenizer,
        compiler: &dyn GrammarCompiler,
        prompt: &[u8],
        ensure_bos_token: bool,
    ) -> Result<Self, Error> {
        let interpreter = compiler
            .compile(grammar, tokenizer)
            .map_err(Error::Interpreter)?;
        Self::with_interpreter(interpreter, tokenizer, prompt, ensure_bos_token)
    }

    /// Drive an already compiled interpreter.
    pub fn with_interpreter(
        mut interpreter: Box<dyn GrammarInterpreter>,
        tokenizer: &dyn Tokenizer,
        prompt: &[u8],
        ensure_bos_token: bool,
    ) -> Result<Self, Error> {
        let prompt = match tokenizer.bos_token() {
            Some(bos) if ensure_bos_token && !prompt.starts_with(bos) => [bos, prompt].concat(),
            _ => prompt.to_vec(),
        };
        let tokens = interpreter
            .process_prompt(tokenizer.encode(&prompt))
            .map_err(Error::Interpreter)?;
        tracing::trace!(prompt_tokens = tokens.len(), "token parser primed");

        Ok(Self {
            interpreter,
            state: ParserState {
                tokens,
                ..Default::default()
            },
        })
    }

    pub fn done(&self) -> bool {
        self.state.done
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Run one interpreter step.
    ///
    /// # Panics
    ///
    /// If the parser is done, or the interpreter returns a mask together with a
    /// token delta or a stop.
    pub fn advance(&mut self) -> Result<(Option<GenData>, ParserResponse), Error> {
        let current = self.state.clone();
        let (gen_data, response, next) = self.step(&current)?;
        self.state = next;
        Ok((gen_data, response))
    }

    /// Hand the caller's choice to the parser; it is replayed on the next advance.
    ///
    /// # Panics
    ///
    /// Unless the last advance returned a mask.
    pub fn consume_token(&mut self, token: u32) {
        self.state = self.state.with_token(token);
    }

    fn step(
        &mut self,
        state: &ParserState,
    ) -> Result<(Option<GenData>, ParserResponse, ParserState), Error> {
        assert!(!state.done, "advance called on a finished parser");

        let output = self
            .interpreter
            .mid_process(state.backtrack, &state.ff_tokens)
            .map_err(Error::Interpreter)?;
        let report = StepReport::parse(&output.report)?;

        let mut tokens = state.tokens.clone();
        let gen_data = match output.mask {
            Some(mask) => {
                assert!(
                    !report.stop && report.backtrack == 0 && report.ff_tokens.is_empty(),
                    "interpreter returned a mask with stop={} backtrack={} ff_tokens={:?}",
                    report.stop,
                    report.backtrack,
                    report.ff_tokens
                );
                Some(GenData {
                    tokens: tokens.clone(),
                    mask,
                    temperature: report.temperature,
                })
            }
            None => {
                assert!(
                    report.backtrack <= tokens.len(),
                    "interpreter backtracked {} tokens out of {}",
                    report.backtrack,
                    tokens.len()
                );
                tokens.truncate(tokens.len() - report.backtrack);
                tokens.extend_from_slice(&report.ff_tokens);
                None
            }
        };

        let response = ParserResponse::from_progress(&report.progress);
        tracing::trace!(
            backtrack = report.backtrack,
            ff_tokens = report.ff_tokens.len(),
            new_bytes = response.new_bytes.len(),
            stop = report.stop,
            masked = gen_data.is_some(),
            "token parser step"
        );

        let next = ParserState {
            tokens,
            ff_tokens: report.ff_tokens,
            backtrack: report.backtrack,
            done: report.stop,
        };
        Ok((gen_data, response, next))
    }
}
