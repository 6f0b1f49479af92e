use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings for generation and streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Prefix prompts with the tokenizer's BOS token when they lack it.
    pub ensure_bos_token: bool,
    /// Whether new models report their nodes to the context renderer.
    pub echo: bool,
    /// How long a stream consumer waits for the next event before checking
    /// whether the worker is still alive.
    pub stream_timeout_ms: u64,
    pub stream_queue_capacity: usize,
    /// Tokens an engine may choose for a single fragment.
    pub max_tokens: usize,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            ensure_bos_token: true,
            echo: true,
            stream_timeout_ms: 5000,
            stream_queue_capacity: 64,
            max_tokens: 256,
        }
    }
}

impl GuidanceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid guidance config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.stream_timeout_ms > 0, "stream_timeout_ms must be > 0");
        ensure!(self.stream_queue_capacity > 0, "stream_queue_capacity must be > 0");
        ensure!(self.max_tokens > 0, "max_tokens must be > 0");
        Ok(())
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}
