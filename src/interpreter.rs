//! Grammar interpreter adapter.
//!
//! The interpreter is an external collaborator that compiles a grammar and then
//! answers one question per generation step: given the tokens appended since the
//! last step, which tokens may come next? The exchange is a four-verb protocol:
//!
//! 1. [`GrammarCompiler::compile`] turns a grammar into an interpreter handle.
//! 2. [`GrammarInterpreter::process_prompt`] primes it with the prompt tokens (and may
//!    rewrite their tail).
//! 3. [`GrammarInterpreter::mid_process`] takes the backtrack count and the tokens
//!    appended since the previous call, and returns either a token mask or a
//!    fast-forward/backtrack delta, plus a JSON progress report.
//! 4. Caller-chosen tokens are replayed on the next `mid_process` call.
//!
//! The report is decoded into [`StepReport`] here so nothing above this module sees
//! raw JSON. [`FragmentInterpreter`] is a byte-level implementation of the protocol
//! for [`crate::grammar::Grammar`] fragments.

mod fragment;
mod program;

pub use fragment::{FragmentCompiler, FragmentInterpreter};

use serde::{Deserialize, Serialize};

use crate::grammar::Grammar;
use crate::tokenizer::Tokenizer;

/// Capture names carrying this prefix accumulate into lists.
pub const LIST_APPEND_PREFIX: &str = "__LIST_APPEND:";

/// Raw output of one `mid_process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Token bitmask (see [`crate::bitmask`]); `None` when the step fast-forwarded,
    /// backtracked or stopped instead.
    pub mask: Option<Vec<u32>>,
    /// JSON-encoded [`StepReport`].
    pub report: String,
}

/// An owned, compiled grammar driven step by step.
pub trait GrammarInterpreter: Send {
    /// Prime the interpreter with the prompt. Returns the prompt tokens the
    /// generation should continue from.
    fn process_prompt(&mut self, prompt: Vec<u32>) -> anyhow::Result<Vec<u32>>;

    /// Advance one step. `backtrack` and `ff_tokens` describe how the token sequence
    /// changed since the previous call.
    fn mid_process(&mut self, backtrack: usize, ff_tokens: &[u32]) -> anyhow::Result<StepOutput>;
}

pub trait GrammarCompiler: Send + Sync {
    fn compile(
        &self,
        grammar: &Grammar,
        tokenizer: &dyn Tokenizer,
    ) -> anyhow::Result<Box<dyn GrammarInterpreter>>;
}

// ---------------------------------------------------------------------------
// Step report
// ---------------------------------------------------------------------------

/// Decoded progress report of one `mid_process` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepReport {
    pub backtrack: usize,
    pub ff_tokens: Vec<u32>,
    pub stop: bool,
    pub temperature: f32,
    pub progress: Vec<ProgressEvent>,
}

impl StepReport {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        // Serializing plain data with string keys cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One entry of the interpreter's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum ProgressEvent {
    Capture {
        /// Raw capture name; list-append captures carry [`LIST_APPEND_PREFIX`].
        name: String,
        #[serde(rename = "hex", with = "hex_bytes")]
        bytes: Vec<u8>,
        log_prob: f64,
    },
    Text {
        #[serde(rename = "hex", with = "hex_bytes")]
        bytes: Vec<u8>,
        num_tokens: usize,
        log_prob: f64,
        is_generated: bool,
    },
    /// Tags this adapter does not interpret.
    #[serde(other)]
    Other,
}

/// Split a raw capture name into its name and list-append flag.
pub fn split_capture_name(raw: &str) -> (&str, bool) {
    match raw.strip_prefix(LIST_APPEND_PREFIX) {
        Some(name) => (name, true),
        None => (raw, false),
    }
}

/// The raw capture name an interpreter reports for `name`.
pub fn raw_capture_name(name: &str, list_append: bool) -> String {
    if list_append {
        format!("{LIST_APPEND_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(de::Error::custom)
    }
}
