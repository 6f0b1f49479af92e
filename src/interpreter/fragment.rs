//! Byte-level interpreter for [`Grammar`] fragments.
//!
//! Runs the compiled [`Program`] as a Pike VM: all live threads advance in lockstep,
//! one byte at a time, in priority order. Token ids below 256 are bytes; the
//! tokenizer's EOS id ends generation once the grammar can match.
//!
//! Per step the interpreter:
//! - replays the caller's tokens and reports them as generated text,
//! - fast-forwards while the grammar cannot end and exactly one byte is legal,
//!   returning those bytes as `ff_tokens` with no mask,
//! - stops once the grammar can end and no byte can extend it,
//! - otherwise returns the mask of legal bytes (plus EOS when the grammar can end).
//!
//! A capture is reported as soon as every live thread agrees on it, and the
//! remainder from the highest-priority matching thread when generation stops.

use anyhow::{bail, ensure, Result};
use rustc_hash::FxHashSet;

use super::program::{Inst, Program};
use super::{raw_capture_name, GrammarCompiler, GrammarInterpreter, ProgressEvent, StepOutput, StepReport};
use crate::bitmask;
use crate::grammar::{ByteClass, Grammar};
use crate::tokenizer::Tokenizer;

/// Compiles grammars into [`FragmentInterpreter`]s.
#[derive(Debug, Clone, Default)]
pub struct FragmentCompiler {
    temperature: Option<f32>,
}

impl FragmentCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sampling temperature reported with every mask.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl GrammarCompiler for FragmentCompiler {
    fn compile(
        &self,
        grammar: &Grammar,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Box<dyn GrammarInterpreter>> {
        let mut interp = FragmentInterpreter::new(grammar, tokenizer)?;
        if let Some(t) = self.temperature {
            interp.temperature = t;
        }
        Ok(Box::new(interp))
    }
}

// ---------------------------------------------------------------------------
// VM state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Span {
    slot: usize,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
struct Thread {
    pc: usize,
    /// Capture slots opened but not yet closed, with their start offsets.
    open: Vec<(usize, usize)>,
    /// Closed captures, in closing order.
    spans: Vec<Span>,
}

pub struct FragmentInterpreter {
    program: Program,
    /// Threads parked on a `Byte` or `Match` instruction, highest priority first.
    threads: Vec<Thread>,
    /// Every byte matched so far.
    text: Vec<u8>,
    /// Number of leading spans already reported.
    emitted: usize,
    /// Fast-forwarded tokens awaiting their echo from the driver.
    forced: Vec<u32>,
    finished: bool,
    eos_token: u32,
    vocab_size: usize,
    temperature: f32,
}

impl FragmentInterpreter {
    pub fn new(grammar: &Grammar, tokenizer: &dyn Tokenizer) -> Result<Self> {
        let vocab_size = tokenizer.vocab_size();
        let eos_token = tokenizer.eos_token_id();
        ensure!(
            vocab_size > 256 && eos_token >= 256 && (eos_token as usize) < vocab_size,
            "fragment interpreter needs a byte vocabulary with EOS above 255 \
             (vocab_size={vocab_size}, eos={eos_token})"
        );

        let program = Program::compile(grammar)?;
        let mut interp = Self {
            program,
            threads: Vec::new(),
            text: Vec::new(),
            emitted: 0,
            forced: Vec::new(),
            finished: false,
            eos_token,
            vocab_size,
            temperature: 0.0,
        };
        interp.threads = interp.closure(vec![Thread {
            pc: 0,
            open: Vec::new(),
            spans: Vec::new(),
        }]);
        Ok(interp)
    }

    /// Follow epsilon transitions from `seeds`, keeping the first thread to reach
    /// each instruction.
    fn closure(&self, seeds: Vec<Thread>) -> Vec<Thread> {
        let pos = self.text.len();
        let mut visited = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack = Vec::new();

        for seed in seeds {
            stack.push(seed);
            while let Some(mut thread) = stack.pop() {
                if !visited.insert(thread.pc) {
                    continue;
                }
                match &self.program.insts[thread.pc] {
                    Inst::Byte(_) | Inst::Match => out.push(thread),
                    Inst::Jump(target) => {
                        thread.pc = *target;
                        stack.push(thread);
                    }
                    Inst::Split(first, second) => {
                        let mut other = thread.clone();
                        other.pc = *second;
                        thread.pc = *first;
                        stack.push(other);
                        stack.push(thread);
                    }
                    Inst::Open(slot) => {
                        thread.open.push((*slot, pos));
                        thread.pc += 1;
                        stack.push(thread);
                    }
                    Inst::Close(slot) => {
                        if let Some(i) = thread.open.iter().rposition(|(s, _)| s == slot) {
                            let (_, start) = thread.open.remove(i);
                            thread.spans.push(Span {
                                slot: *slot,
                                start,
                                end: pos,
                            });
                        }
                        thread.pc += 1;
                        stack.push(thread);
                    }
                }
            }
        }
        out
    }

    /// Advance every thread over `b`. Returns false (leaving the state untouched)
    /// if no thread accepts it.
    fn step(&mut self, b: u8) -> bool {
        let seeds: Vec<Thread> = self
            .threads
            .iter()
            .filter(|t| matches!(&self.program.insts[t.pc], Inst::Byte(class) if class.contains(b)))
            .map(|t| Thread {
                pc: t.pc + 1,
                ..t.clone()
            })
            .collect();
        if seeds.is_empty() {
            return false;
        }
        self.text.push(b);
        self.threads = self.closure(seeds);
        true
    }

    fn legal_bytes(&self) -> ByteClass {
        self.threads
            .iter()
            .fold(ByteClass::empty(), |acc, t| match &self.program.insts[t.pc] {
                Inst::Byte(class) => acc.union(*class),
                _ => acc,
            })
    }

    fn can_match(&self) -> bool {
        self.threads
            .iter()
            .any(|t| self.program.insts[t.pc] == Inst::Match)
    }

    fn capture_event(&self, span: &Span) -> ProgressEvent {
        let slot = &self.program.slots[span.slot];
        ProgressEvent::Capture {
            name: raw_capture_name(&slot.name, slot.list_append),
            bytes: self.text[span.start..span.end].to_vec(),
            log_prob: 0.0,
        }
    }

    /// Report spans every live thread has closed identically.
    fn emit_settled(&mut self, report: &mut StepReport) {
        let Some((first, rest)) = self.threads.split_first() else {
            return;
        };
        let settled = rest.iter().fold(first.spans.len(), |n, t| {
            first.spans[..n]
                .iter()
                .zip(&t.spans)
                .take_while(|(a, b)| a == b)
                .count()
        });
        if settled > self.emitted {
            for span in &first.spans[self.emitted..settled] {
                report.progress.push(self.capture_event(span));
            }
            self.emitted = settled;
        }
    }

    fn finish(&mut self, report: &mut StepReport) {
        self.finished = true;
        report.stop = true;
        let best = self
            .threads
            .iter()
            .find(|t| self.program.insts[t.pc] == Inst::Match);
        if let Some(best) = best {
            for span in best.spans.iter().skip(self.emitted) {
                report.progress.push(self.capture_event(span));
            }
            self.emitted = best.spans.len();
        }
        tracing::trace!(bytes = self.text.len(), "fragment matched");
    }

    fn accept_caller_tokens(&mut self, tokens: &[u32], report: &mut StepReport) -> Result<()> {
        let mut generated = Vec::new();
        let mut saw_eos = false;
        for (i, &tok) in tokens.iter().enumerate() {
            if tok == self.eos_token {
                ensure!(self.can_match(), "end of sequence before the grammar is complete");
                ensure!(i + 1 == tokens.len(), "tokens after end of sequence: {tokens:?}");
                saw_eos = true;
                break;
            }
            ensure!(tok < 256, "token {tok} is not a byte token");
            let b = tok as u8;
            if !self.step(b) {
                bail!(
                    "byte {:?} not allowed after {:?}",
                    char::from(b),
                    String::from_utf8_lossy(&self.text)
                );
            }
            generated.push(b);
        }

        if !generated.is_empty() {
            report.progress.push(ProgressEvent::Text {
                num_tokens: generated.len(),
                bytes: generated,
                log_prob: 0.0,
                is_generated: true,
            });
            self.emit_settled(report);
        }
        if saw_eos {
            self.finish(report);
        }
        Ok(())
    }

    /// Consume bytes the grammar forces. Returns the forced tokens.
    fn fast_forward(&mut self, report: &mut StepReport) -> Vec<u32> {
        let mut forced = Vec::new();
        while !self.can_match() {
            let Some(b) = self.legal_bytes().as_single() else {
                break;
            };
            self.step(b);
            forced.push(b);
        }
        if forced.is_empty() {
            return Vec::new();
        }

        let tokens = forced.iter().map(|&b| b as u32).collect();
        report.progress.push(ProgressEvent::Text {
            num_tokens: forced.len(),
            bytes: forced,
            log_prob: 0.0,
            is_generated: false,
        });
        self.emit_settled(report);
        tokens
    }
}

impl GrammarInterpreter for FragmentInterpreter {
    fn process_prompt(&mut self, prompt: Vec<u32>) -> Result<Vec<u32>> {
        tracing::trace!(prompt_tokens = prompt.len(), "fragment interpreter primed");
        Ok(prompt)
    }

    fn mid_process(&mut self, backtrack: usize, ff_tokens: &[u32]) -> Result<StepOutput> {
        ensure!(!self.finished, "mid_process called after the grammar stopped");
        ensure!(backtrack == 0, "fragment interpreter never backtracks (got {backtrack})");

        let mut report = StepReport {
            temperature: self.temperature,
            ..Default::default()
        };

        if !self.forced.is_empty() {
            ensure!(
                ff_tokens == self.forced.as_slice(),
                "expected forced tokens {:?} to be replayed, got {ff_tokens:?}",
                self.forced
            );
            self.forced.clear();
        } else {
            self.accept_caller_tokens(ff_tokens, &mut report)?;
        }

        if self.finished {
            return Ok(StepOutput {
                mask: None,
                report: report.to_json(),
            });
        }

        let forced = self.fast_forward(&mut report);
        let legal = self.legal_bytes();
        let can_match = self.can_match();

        let mask = if can_match && legal.is_empty() {
            report.ff_tokens = forced.clone();
            self.forced = forced;
            self.finish(&mut report);
            None
        } else if !forced.is_empty() {
            report.ff_tokens = forced.clone();
            self.forced = forced;
            None
        } else {
            ensure!(
                !legal.is_empty(),
                "grammar admits no continuation after {:?}",
                String::from_utf8_lossy(&self.text)
            );
            let ids = legal
                .iter()
                .map(u32::from)
                .chain(can_match.then_some(self.eos_token));
            Some(bitmask::from_token_ids(ids, self.vocab_size))
        };

        tracing::trace!(
            pos = self.text.len(),
            threads = self.threads.len(),
            ff = report.ff_tokens.len(),
            stop = report.stop,
            "fragment step"
        );

        Ok(StepOutput {
            mask,
            report: report.to_json(),
        })
    }
}
