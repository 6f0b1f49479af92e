//! Grammar-constrained generation.
//!
//! Two layers:
//!
//! - **Parsers** ([`parser`]): a [`TokenParser`] drives a grammar interpreter step by
//!   step (masks, fast-forward and backtrack deltas, captures), and a [`ByteParser`]
//!   exposes the same automaton one byte at a time.
//! - **Generation tree** ([`model`]): immutable [`Model`] nodes extended by appending
//!   grammar fragments, with scoped [`Block`]s and background [`stream`]ing.
//!
//! The interpreter, tokenizer and logits oracle are traits. The crate ships a
//! byte-level implementation of each so everything runs end to end without a real
//! model.

pub mod bitmask;
pub mod block;
pub mod config;
pub mod context;
pub mod error;
pub mod grammar;
pub mod interpreter;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod stream;
pub mod telemetry;
pub mod tokenizer;

pub use block::Block;
pub use config::GuidanceConfig;
pub use context::GenContext;
pub use error::{Error, ParserError};
pub use grammar::{ByteClass, Grammar};
pub use interpreter::{FragmentCompiler, FragmentInterpreter, GrammarCompiler, GrammarInterpreter};
pub use model::{Client, EngineClient, Fragment, LogitsOracle, Model};
pub use parser::{ByteParser, Capture, CaptureData, GenData, ParserResponse, ParserState, TokenParser};
pub use stream::{ModelStream, StreamHandle};
pub use tokenizer::{ByteTokenizer, Tokenizer};
