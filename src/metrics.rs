//! Token-level generation metrics.
//!
//! [`EngineMetrics`] counts what an engine sent to and received from its model.
//! [`Monitor`] combines those counters with per-node data (token count, latency
//! along a node's lineage).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::model::{Chunk, Model};

/// Token counters updated by an engine client.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    input_tokens: AtomicUsize,
    output_tokens: AtomicUsize,
    backtrack_tokens: AtomicUsize,
}

impl EngineMetrics {
    pub fn input_tokens(&self) -> usize {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> usize {
        self.output_tokens.load(Ordering::Relaxed)
    }

    pub fn backtrack_tokens(&self) -> usize {
        self.backtrack_tokens.load(Ordering::Relaxed)
    }

    pub fn add_input_tokens(&self, n: usize) {
        self.input_tokens.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_output_tokens(&self, n: usize) {
        self.output_tokens.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_backtrack_tokens(&self, n: usize) {
        self.backtrack_tokens.fetch_add(n, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
        self.backtrack_tokens.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoringMetric {
    InputTokens,
    OutputTokens,
    BacktrackTokens,
    TokenCount,
    TokenReduction,
    AvgLatency,
}

impl MonitoringMetric {
    pub const ALL: [MonitoringMetric; 6] = [
        MonitoringMetric::InputTokens,
        MonitoringMetric::OutputTokens,
        MonitoringMetric::BacktrackTokens,
        MonitoringMetric::TokenCount,
        MonitoringMetric::TokenReduction,
        MonitoringMetric::AvgLatency,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Count(usize),
    Ratio(f64),
    Millis(f64),
}

pub struct Monitor {
    engine_metrics: Arc<EngineMetrics>,
}

impl Monitor {
    pub fn new(engine_metrics: Arc<EngineMetrics>) -> Self {
        Self { engine_metrics }
    }

    pub fn get_metric(&self, metric: MonitoringMetric, model: Option<&Model>) -> Option<MetricValue> {
        match metric {
            MonitoringMetric::InputTokens => Some(MetricValue::Count(self.engine_metrics.input_tokens())),
            MonitoringMetric::OutputTokens => Some(MetricValue::Count(self.engine_metrics.output_tokens())),
            MonitoringMetric::BacktrackTokens => {
                Some(MetricValue::Count(self.engine_metrics.backtrack_tokens()))
            }
            MonitoringMetric::TokenCount => model.map(|m| MetricValue::Count(m.token_count())),
            MonitoringMetric::TokenReduction => {
                let token_count = model?.token_count();
                if token_count == 0 {
                    return None;
                }
                let ratio = self.engine_metrics.output_tokens() as f64 / token_count as f64;
                Some(MetricValue::Ratio(1.0 - ratio.min(1.0)))
            }
            MonitoringMetric::AvgLatency => avg_latency(model?).map(MetricValue::Millis),
        }
    }

    pub fn get_metrics(
        &self,
        metrics: &[MonitoringMetric],
        model: Option<&Model>,
    ) -> Vec<(MonitoringMetric, Option<MetricValue>)> {
        metrics
            .iter()
            .map(|&metric| (metric, self.get_metric(metric, model)))
            .collect()
    }
}

/// Mean per-token latency over the text chunks on the lineage of `model`.
fn avg_latency(model: &Model) -> Option<f64> {
    let (latency, tokens) = model
        .trace()
        .lineage(model.id())
        .into_iter()
        .filter_map(|node| match node.attr {
            Some(Chunk::Text(text)) => Some((text.latency_ms, text.token_count)),
            _ => None,
        })
        .fold((0.0, 0usize), |(lat, n), (l, t)| (lat + l, n + t));

    (tokens > 0).then(|| latency / tokens as f64)
}
