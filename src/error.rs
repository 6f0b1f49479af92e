//! Error types.
//!
//! Protocol desyncs with the interpreter are driver bugs and panic. Everything a
//! caller can react to is an [`Error`].

use thiserror::Error;

/// Errors raised while matching caller bytes against a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserError {
    /// The caller's next byte is not what the grammar allows at the cursor.
    #[error(
        "expected {}, got {} after {}",
        describe_allowed(.allowed_bytes),
        show_byte(*.current_byte),
        show_bytes(.consumed_bytes)
    )]
    ByteMismatch {
        current_byte: u8,
        allowed_bytes: Vec<u8>,
        /// Bytes the caller had already matched when the mismatch happened.
        consumed_bytes: Vec<u8>,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error("{0} not yet supported")]
    Unsupported(String),

    #[error("interpreter error: {0:#}")]
    Interpreter(anyhow::Error),

    #[error("malformed interpreter report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("model oracle error: {0:#}")]
    Oracle(anyhow::Error),

    #[error("generation exceeded {0} tokens before the grammar finished")]
    TokenLimit(usize),

    #[error("model does not contain the variable {0:?}")]
    MissingCapture(String),
}

fn show_byte(b: u8) -> String {
    format!("b'{}'", std::ascii::escape_default(b))
}

fn show_bytes(bytes: &[u8]) -> String {
    let escaped: String = bytes
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect();
    format!("b\"{escaped}\"")
}

fn describe_allowed(allowed: &[u8]) -> String {
    match allowed {
        [] => "end of input".to_string(),
        [b] => format!("byte {}", show_byte(*b)),
        many => {
            let list: Vec<String> = many.iter().map(|&b| show_byte(b)).collect();
            format!("one of [{}]", list.join(", "))
        }
    }
}
