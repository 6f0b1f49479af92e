//! Turning grammar fragments into chunks.
//!
//! A [`Client`] runs one fragment against the current state and emits the chunks
//! that extend it. [`EngineClient`] does so by driving a [`TokenParser`] against a
//! [`LogitsOracle`], choosing the highest-scoring legal token at every step.

use std::sync::Arc;
use std::time::Instant;

use super::chunk::{CaptureOutput, Chunk, TextOutput};
use super::state::State;
use crate::bitmask::apply_token_bitmask_inplace;
use crate::config::GuidanceConfig;
use crate::error::Error;
use crate::grammar::Grammar;
use crate::interpreter::{FragmentCompiler, GrammarCompiler};
use crate::metrics::EngineMetrics;
use crate::parser::{Capture, ParserResponse, TokenParser};
use crate::tokenizer::{ByteTokenizer, Tokenizer};

pub trait Client: Send + Sync {
    /// Run `grammar` as a continuation of `state`, emitting chunks in order.
    fn run(&self, state: &State, grammar: &Grammar, emit: &mut dyn FnMut(Chunk)) -> Result<(), Error>;
}

/// Next-token scores for a token sequence.
pub trait LogitsOracle: Send + Sync {
    /// One logit per vocabulary entry.
    fn get_logits(&self, tokens: &[u32]) -> anyhow::Result<Vec<f32>>;
}

pub struct EngineClient {
    oracle: Arc<dyn LogitsOracle>,
    tokenizer: Arc<dyn Tokenizer>,
    compiler: Arc<dyn GrammarCompiler>,
    metrics: Arc<EngineMetrics>,
    ensure_bos_token: bool,
    max_tokens: usize,
}

impl EngineClient {
    /// Byte-level engine over the built-in fragment interpreter.
    pub fn new(oracle: impl LogitsOracle + 'static) -> Self {
        let config = GuidanceConfig::default();
        Self {
            oracle: Arc::new(oracle),
            tokenizer: Arc::new(ByteTokenizer::new()),
            compiler: Arc::new(FragmentCompiler::default()),
            metrics: Arc::new(EngineMetrics::default()),
            ensure_bos_token: config.ensure_bos_token,
            max_tokens: config.max_tokens,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Arc::new(tokenizer);
        self
    }

    pub fn with_compiler(mut self, compiler: impl GrammarCompiler + 'static) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }

    pub fn with_config(mut self, config: &GuidanceConfig) -> Self {
        self.ensure_bos_token = config.ensure_bos_token;
        self.max_tokens = config.max_tokens;
        self
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    fn emit_response(
        &self,
        response: ParserResponse,
        chosen: Option<(f64, f64)>,
        emit: &mut dyn FnMut(Chunk),
    ) {
        if !response.new_bytes.is_empty() {
            let (log_prob, latency_ms) = match chosen {
                Some(choice) if response.is_generated => choice,
                _ => (response.new_bytes_prob, 0.0),
            };
            emit(Chunk::Text(TextOutput {
                bytes: response.new_bytes,
                is_generated: response.is_generated,
                token_count: response.new_token_count,
                log_prob,
                latency_ms,
            }));
        }

        for (name, value, log_prob) in response.captures.iter() {
            match (value, log_prob) {
                (Capture::Scalar(v), Capture::Scalar(lp)) => emit(capture_chunk(name, v, *lp, false)),
                (Capture::List(items), Capture::List(lps)) => {
                    for (v, lp) in items.iter().zip(lps) {
                        emit(capture_chunk(name, v, *lp, true));
                    }
                }
                _ => tracing::warn!(name, "capture value and log-prob shapes differ"),
            }
        }
    }
}

impl Client for EngineClient {
    fn run(&self, state: &State, grammar: &Grammar, emit: &mut dyn FnMut(Chunk)) -> Result<(), Error> {
        if let Some(bytes) = grammar.as_literal() {
            if !bytes.is_empty() {
                emit(Chunk::Literal(bytes));
            }
            return Ok(());
        }

        let mut parser = TokenParser::new(
            grammar,
            self.tokenizer.as_ref(),
            self.compiler.as_ref(),
            state.bytes(),
            self.ensure_bos_token,
        )?;

        // Tokens the oracle has already seen, as with a KV cache.
        let mut fed = 0usize;
        let mut generated = 0usize;
        let mut chosen = None;

        while !parser.done() {
            let (gen_data, response) = parser.advance()?;
            self.metrics.add_backtrack_tokens(parser.state().backtrack);
            self.emit_response(response, chosen.take(), emit);

            let Some(gen_data) = gen_data else {
                continue;
            };
            if generated >= self.max_tokens {
                return Err(Error::TokenLimit(self.max_tokens));
            }

            let started = Instant::now();
            let mut logits = self
                .oracle
                .get_logits(&gen_data.tokens)
                .map_err(Error::Oracle)?;
            self.metrics
                .add_input_tokens(gen_data.tokens.len().saturating_sub(fed));
            fed = gen_data.tokens.len();

            apply_token_bitmask_inplace(&mut logits, &gen_data.mask);
            let (token, log_prob) = select_greedy(&logits).ok_or_else(|| {
                Error::Oracle(anyhow::anyhow!(
                    "no legal token among {} logits",
                    logits.len()
                ))
            })?;
            tracing::trace!(token, log_prob, "selected token");

            chosen = Some((log_prob, started.elapsed().as_secs_f64() * 1000.0));
            self.metrics.add_output_tokens(1);
            generated += 1;
            parser.consume_token(token);
        }
        Ok(())
    }
}

fn capture_chunk(name: &str, value: &[u8], log_prob: f64, list_append: bool) -> Chunk {
    Chunk::Capture(CaptureOutput {
        name: name.to_string(),
        value: String::from_utf8_lossy(value).into_owned(),
        log_prob: Some(log_prob),
        list_append,
    })
}

/// Highest finite logit (first wins on ties) and its log-softmax probability.
pub(crate) fn select_greedy(logits: &[f32]) -> Option<(u32, f64)> {
    let (best, max) = logits
        .iter()
        .enumerate()
        .filter(|(_, x)| x.is_finite())
        .fold(None, |acc: Option<(usize, f32)>, (i, &x)| match acc {
            Some((_, m)) if m >= x => acc,
            _ => Some((i, x)),
        })?;

    let max = max as f64;
    let sum: f64 = logits
        .iter()
        .filter(|x| x.is_finite())
        .map(|&x| (x as f64 - max).exp())
        .sum();
    Some((best as u32, -sum.ln()))
}
