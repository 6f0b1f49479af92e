use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use pie_guidance::error::Error;
use pie_guidance::model::Model;
use pie_guidance::{GenContext, GuidanceConfig};

use crate::common::{Outcome, RecordingRenderer, ScriptedClient};

fn model_with(client: ScriptedClient) -> Model {
    Model::new(Arc::new(client))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_yields_every_node_in_order() {
    let ctx = GenContext::new();
    let mut handle = model_with(ScriptedClient::new()).stream().then("abc").start(&ctx);

    let mut texts = Vec::new();
    while let Some(item) = handle.next().await {
        texts.push(item.unwrap().text());
    }
    assert_eq!(texts, vec!["a", "ab", "abc"]);
    assert!(handle.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chained_appends_share_one_stream() {
    let ctx = GenContext::new();
    let lm = model_with(ScriptedClient::new()).append("x", &ctx).unwrap();
    let mut handle = lm.stream().then("y").then("z").start(&ctx);

    let mut last = None;
    let mut count = 0;
    while let Some(item) = handle.next().await {
        last = Some(item.unwrap());
        count += 1;
    }
    assert_eq!(count, 2);
    let last = last.unwrap();
    assert_eq!(last.text(), "xyz");
    assert!(!last.echo());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_chain_finishes_immediately() {
    let mut handle = model_with(ScriptedClient::new()).stream().start(&GenContext::new());
    assert!(handle.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_error_is_delivered_last() {
    let client = ScriptedClient::new().with_outcome(Outcome::Fail);
    let mut handle = model_with(client).stream().then("ab").start(&GenContext::new());

    assert_eq!(handle.next().await.unwrap().unwrap().text(), "a");
    assert_eq!(handle.next().await.unwrap().unwrap().text(), "ab");
    let err = handle.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(handle.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[should_panic(expected = "scripted panic")]
async fn test_worker_panic_is_resumed() {
    let client = ScriptedClient::new().with_outcome(Outcome::Panic);
    let mut handle = model_with(client).stream().then("a").start(&GenContext::new());
    while handle.next().await.is_some() {}
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_nodes_are_not_echoed() {
    let renderer = Arc::new(RecordingRenderer::default());
    let ctx = GenContext::new().with_renderer(renderer.clone());
    let lm = model_with(ScriptedClient::new());
    assert!(lm.echo());

    let mut handle = lm.stream().then("abc").start(&ctx);
    while let Some(item) = handle.next().await {
        item.unwrap();
    }
    assert!(renderer.messages().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_worker_outlives_short_timeouts() {
    let client = ScriptedClient::new().with_delay(Duration::from_millis(40));
    let mut handle = model_with(client)
        .stream()
        .then("abc")
        .with_timeout(Duration::from_millis(5))
        .start(&GenContext::new());

    let mut count = 0;
    while let Some(item) = handle.next().await {
        item.unwrap();
        count += 1;
    }
    assert_eq!(count, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_small_queue_applies_backpressure() {
    let config = GuidanceConfig {
        stream_queue_capacity: 1,
        stream_timeout_ms: 50,
        ..Default::default()
    };
    let handle = model_with(ScriptedClient::new())
        .stream()
        .then("abcdef")
        .with_config(&config)
        .start(&GenContext::new());

    let texts: Vec<String> = handle
        .into_stream()
        .map(|item| item.map(|m| m.text()))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(texts, vec!["a", "ab", "abc", "abcd", "abcde", "abcdef"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_handle_leaves_the_worker_running() {
    let config = GuidanceConfig {
        stream_queue_capacity: 1,
        ..Default::default()
    };
    let lm = model_with(ScriptedClient::new());
    let trace = lm.trace().clone();
    let before = trace.len();

    let mut handle = lm.stream().then("abcdefghij").with_config(&config).start(&GenContext::new());
    assert_eq!(handle.next().await.unwrap().unwrap().text(), "a");
    drop(handle);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while trace.len() < before + 10 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "worker stopped after {} nodes",
            trace.len() - before
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
