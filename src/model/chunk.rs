/// One unit of change applied to a generation node.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Caller-supplied text, appended verbatim.
    Literal(Vec<u8>),
    Text(TextOutput),
    Capture(CaptureOutput),
    RoleOpener(RoleMarker),
    RoleCloser(RoleMarker),
}

impl Chunk {
    /// Bytes this chunk appends to the rendered text.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Chunk::Literal(bytes) => bytes,
            Chunk::Text(text) => &text.bytes,
            Chunk::Capture(_) => &[],
            Chunk::RoleOpener(marker) | Chunk::RoleCloser(marker) => marker.text.as_bytes(),
        }
    }
}

/// Text produced under a grammar, either chosen by the model or forced.
#[derive(Debug, Clone, PartialEq)]
pub struct TextOutput {
    pub bytes: Vec<u8>,
    pub is_generated: bool,
    pub token_count: usize,
    pub log_prob: f64,
    /// Wall time spent producing the chunk.
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutput {
    pub name: String,
    pub value: String,
    pub log_prob: Option<f64>,
    pub list_append: bool,
}

/// Start or end of a chat role, with the text that marks it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleMarker {
    pub role: String,
    pub text: String,
}

impl RoleMarker {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }
}
