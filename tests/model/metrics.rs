use std::sync::Arc;

use pie_guidance::grammar::{capture, char_range, literal, one_or_more};
use pie_guidance::metrics::{EngineMetrics, MetricValue, Monitor, MonitoringMetric};
use pie_guidance::model::{EngineClient, Model};
use pie_guidance::GenContext;

use crate::common::{ScriptedClient, ScriptedOracle};

#[test]
fn test_average_latency_over_lineage() {
    let ctx = GenContext::new();
    let lm = Model::new(Arc::new(ScriptedClient::new()))
        .append("abcd", &ctx)
        .unwrap()
        .set("k", "v");
    let monitor = Monitor::new(Arc::new(EngineMetrics::default()));

    assert_eq!(
        monitor.get_metric(MonitoringMetric::AvgLatency, Some(&lm)),
        Some(MetricValue::Millis(4.0))
    );
    assert_eq!(
        monitor.get_metric(MonitoringMetric::TokenCount, Some(&lm)),
        Some(MetricValue::Count(4))
    );
    // Nothing went through an engine.
    assert_eq!(
        monitor.get_metric(MonitoringMetric::TokenReduction, Some(&lm)),
        Some(MetricValue::Ratio(1.0))
    );
}

#[test]
fn test_root_has_no_latency() {
    let lm = Model::new(Arc::new(ScriptedClient::new()));
    let monitor = Monitor::new(Arc::new(EngineMetrics::default()));
    assert_eq!(monitor.get_metric(MonitoringMetric::AvgLatency, Some(&lm)), None);
    assert_eq!(monitor.get_metric(MonitoringMetric::TokenReduction, Some(&lm)), None);
}

#[test]
fn test_engine_counters_and_token_reduction() {
    let client = EngineClient::new(ScriptedOracle::bytes(b"42"));
    let monitor = Monitor::new(client.metrics());
    let lm = Model::new(Arc::new(client))
        .append(
            literal("Answer: ") + capture("n", one_or_more(char_range(b'0', b'9'))),
            &GenContext::new(),
        )
        .unwrap();

    let values = monitor.get_metrics(&MonitoringMetric::ALL, Some(&lm));
    let value = |metric: MonitoringMetric| {
        values
            .iter()
            .find(|(m, _)| *m == metric)
            .and_then(|(_, v)| *v)
    };

    assert_eq!(value(MonitoringMetric::InputTokens), Some(MetricValue::Count(10)));
    assert_eq!(value(MonitoringMetric::OutputTokens), Some(MetricValue::Count(3)));
    assert_eq!(value(MonitoringMetric::BacktrackTokens), Some(MetricValue::Count(0)));
    assert_eq!(value(MonitoringMetric::TokenCount), Some(MetricValue::Count(10)));
    match value(MonitoringMetric::TokenReduction) {
        Some(MetricValue::Ratio(r)) => assert!((r - 0.7).abs() < 1e-9, "reduction {r}"),
        other => panic!("unexpected token reduction {other:?}"),
    }
    match value(MonitoringMetric::AvgLatency) {
        Some(MetricValue::Millis(ms)) => assert!(ms >= 0.0),
        other => panic!("unexpected latency {other:?}"),
    }
}
