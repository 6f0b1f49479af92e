//! Test infrastructure for integration tests.
//!
//! Scripted stand-ins for the external collaborators: an interpreter that replays
//! canned steps, a logits oracle that prefers a fixed token sequence, a client that
//! emits canned chunks and a renderer that records what it is shown.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use pie_guidance::bitmask;
use pie_guidance::error::Error;
use pie_guidance::grammar::Grammar;
use pie_guidance::interpreter::{GrammarInterpreter, ProgressEvent, StepOutput, StepReport};
use pie_guidance::model::{Chunk, Client, LogitsOracle, Renderer, State, TextOutput, TraceMessage};

// =============================================================================
// Interpreter
// =============================================================================

/// One canned `mid_process` answer.
pub struct Step {
    pub mask: Option<Vec<u32>>,
    pub report: StepReport,
}

impl Step {
    /// Ask the caller to choose among `allowed`.
    pub fn mask(allowed: &[u32], vocab_size: usize) -> Self {
        Self {
            mask: Some(bitmask::from_token_ids(allowed.iter().copied(), vocab_size)),
            report: StepReport::default(),
        }
    }

    pub fn forward(ff_tokens: &[u32]) -> Self {
        Self {
            mask: None,
            report: StepReport {
                ff_tokens: ff_tokens.to_vec(),
                ..Default::default()
            },
        }
    }

    pub fn stop() -> Self {
        Self {
            mask: None,
            report: StepReport {
                stop: true,
                ..Default::default()
            },
        }
    }

    pub fn with_backtrack(mut self, backtrack: usize) -> Self {
        self.report.backtrack = backtrack;
        self
    }

    pub fn with_stop(mut self) -> Self {
        self.report.stop = true;
        self
    }

    pub fn with_text(mut self, text: &[u8], log_prob: f64, is_generated: bool) -> Self {
        self.report.progress.push(ProgressEvent::Text {
            bytes: text.to_vec(),
            num_tokens: text.len(),
            log_prob,
            is_generated,
        });
        self
    }

    pub fn with_capture(mut self, name: &str, value: &[u8], log_prob: f64) -> Self {
        self.report.progress.push(ProgressEvent::Capture {
            name: name.to_string(),
            bytes: value.to_vec(),
            log_prob,
        });
        self
    }
}

/// Calls an interpreter received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prompt(Vec<u32>),
    Mid { backtrack: usize, ff_tokens: Vec<u32> },
}

/// Replays canned steps and records every call.
pub struct ScriptedInterpreter {
    steps: VecDeque<Step>,
    calls: Arc<Mutex<Vec<Call>>>,
    /// Raw report to return instead of the next step's, once.
    raw_report: Option<String>,
}

impl ScriptedInterpreter {
    pub fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let interp = Self {
            steps: steps.into(),
            calls: calls.clone(),
            raw_report: None,
        };
        (interp, calls)
    }

    pub fn with_raw_report(mut self, report: &str) -> Self {
        self.raw_report = Some(report.to_string());
        self
    }
}

impl GrammarInterpreter for ScriptedInterpreter {
    fn process_prompt(&mut self, prompt: Vec<u32>) -> Result<Vec<u32>> {
        self.calls.lock().unwrap().push(Call::Prompt(prompt.clone()));
        Ok(prompt)
    }

    fn mid_process(&mut self, backtrack: usize, ff_tokens: &[u32]) -> Result<StepOutput> {
        self.calls.lock().unwrap().push(Call::Mid {
            backtrack,
            ff_tokens: ff_tokens.to_vec(),
        });
        if let Some(report) = self.raw_report.take() {
            return Ok(StepOutput { mask: None, report });
        }
        let Some(step) = self.steps.pop_front() else {
            bail!("script exhausted");
        };
        Ok(StepOutput {
            mask: step.mask,
            report: step.report.to_json(),
        })
    }
}

// =============================================================================
// Oracle
// =============================================================================

/// Scores the next scripted token highest; everything else gets zero.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<u32>>,
    vocab_size: usize,
    seen: Mutex<Vec<Vec<u32>>>,
}

impl ScriptedOracle {
    pub fn new(script: &[u32], vocab_size: usize) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            vocab_size,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Prefer the bytes of `text`, then end of sequence.
    pub fn bytes(text: &[u8]) -> Self {
        let mut script: Vec<u32> = text.iter().map(|&b| b as u32).collect();
        script.push(pie_guidance::tokenizer::BYTE_EOS_TOKEN);
        Self::new(&script, pie_guidance::tokenizer::BYTE_VOCAB_SIZE)
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl LogitsOracle for ScriptedOracle {
    fn get_logits(&self, tokens: &[u32]) -> Result<Vec<f32>> {
        self.seen.lock().unwrap().push(tokens.to_vec());
        let mut logits = vec![0.0; self.vocab_size];
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            logits[next as usize] = 10.0;
        }
        Ok(logits)
    }
}

/// An oracle that always fails.
pub struct BrokenOracle;

impl LogitsOracle for BrokenOracle {
    fn get_logits(&self, _tokens: &[u32]) -> Result<Vec<f32>> {
        bail!("device unavailable")
    }
}

// =============================================================================
// Client
// =============================================================================

#[derive(Clone)]
pub enum Outcome {
    Complete,
    Fail,
    Panic,
}

/// Emits one text chunk per byte of the fragment's literal text, ignoring the state.
pub struct ScriptedClient {
    delay: Duration,
    outcome: Outcome,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Outcome::Complete,
        }
    }

    /// Sleep before every chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// What happens after the chunks are emitted.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }
}

impl Client for ScriptedClient {
    fn run(&self, _state: &State, grammar: &Grammar, emit: &mut dyn FnMut(Chunk)) -> Result<(), Error> {
        let text = grammar.as_literal().unwrap_or_default();
        for &b in &text {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            emit(Chunk::Text(TextOutput {
                bytes: vec![b],
                is_generated: true,
                token_count: 1,
                log_prob: -0.5,
                latency_ms: 4.0,
            }));
        }
        match self.outcome {
            Outcome::Complete => Ok(()),
            Outcome::Fail => Err(Error::Unsupported("scripted failure".into())),
            Outcome::Panic => panic!("scripted panic"),
        }
    }
}

// =============================================================================
// Renderer
// =============================================================================

#[derive(Default)]
pub struct RecordingRenderer {
    messages: Mutex<Vec<TraceMessage>>,
}

impl RecordingRenderer {
    pub fn messages(&self) -> Vec<TraceMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl Renderer for RecordingRenderer {
    fn update(&self, message: TraceMessage) {
        self.messages.lock().unwrap().push(message);
    }
}
