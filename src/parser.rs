//! Grammar-constrained parsers.
//!
//! [`TokenParser`] speaks the interpreter's token protocol; [`ByteParser`] layers a
//! byte cursor on top of it for callers that think in bytes.

mod byte;
mod capture;
mod token;

pub use byte::ByteParser;
pub use capture::{Capture, CaptureData, CaptureMap};
pub use token::{GenData, ParserResponse, ParserState, TokenParser};
