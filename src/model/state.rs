use std::borrow::Cow;

use super::chunk::Chunk;
use crate::parser::CaptureMap;

/// Durable contents of a generation node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    text: Vec<u8>,
    captures: CaptureMap<String, Option<f64>>,
    active_role: Option<String>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered bytes so far.
    pub fn bytes(&self) -> &[u8] {
        &self.text
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    pub fn captures(&self) -> &CaptureMap<String, Option<f64>> {
        &self.captures
    }

    pub(crate) fn captures_mut(&mut self) -> &mut CaptureMap<String, Option<f64>> {
        &mut self.captures
    }

    pub fn active_role(&self) -> Option<&str> {
        self.active_role.as_deref()
    }

    pub(crate) fn apply_chunk(&mut self, chunk: &Chunk) {
        match chunk {
            Chunk::Literal(bytes) => self.text.extend_from_slice(bytes),
            Chunk::Text(output) => self.text.extend_from_slice(&output.bytes),
            Chunk::Capture(capture) => self.captures.record(
                &capture.name,
                capture.value.clone(),
                capture.log_prob,
                capture.list_append,
            ),
            Chunk::RoleOpener(marker) => {
                self.active_role = Some(marker.role.clone());
                self.text.extend_from_slice(marker.text.as_bytes());
            }
            Chunk::RoleCloser(marker) => {
                self.active_role = None;
                self.text.extend_from_slice(marker.text.as_bytes());
            }
        }
    }
}
