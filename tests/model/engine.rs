use std::sync::Arc;

use pie_guidance::error::Error;
use pie_guidance::grammar::{capture, char_range, literal, one_or_more, Grammar};
use pie_guidance::metrics::EngineMetrics;
use pie_guidance::model::{Chunk, EngineClient, Model};
use pie_guidance::parser::Capture;
use pie_guidance::{GenContext, GuidanceConfig};

use crate::common::{BrokenOracle, ScriptedOracle};

fn answer_grammar() -> Grammar {
    literal("Answer: ") + capture("n", one_or_more(char_range(b'0', b'9')))
}

fn engine(oracle: ScriptedOracle) -> (Model, Arc<EngineMetrics>) {
    let client = EngineClient::new(oracle);
    let metrics = client.metrics();
    (Model::new(Arc::new(client)), metrics)
}

#[test]
fn test_constrained_answer() {
    let (lm, metrics) = engine(ScriptedOracle::bytes(b"42"));
    let lm = lm.append(answer_grammar(), &GenContext::new()).unwrap();

    assert_eq!(lm.text(), "Answer: 42");
    assert_eq!(lm.get("n"), Some(&Capture::Scalar("42".to_string())));
    assert!(matches!(lm.log_prob("n"), Some(Capture::Scalar(Some(_)))));
    assert_eq!(lm.token_count(), 10);

    assert_eq!(metrics.output_tokens(), 3);
    assert_eq!(metrics.input_tokens(), 10);
    assert_eq!(metrics.backtrack_tokens(), 0);
}

#[test]
fn test_literal_fragment_skips_the_oracle() {
    let (lm, metrics) = engine(ScriptedOracle::bytes(b""));
    let lm = lm.append("Answer: ", &GenContext::new()).unwrap();

    assert_eq!(lm.text(), "Answer: ");
    assert_eq!(lm.token_count(), 0);
    assert_eq!(metrics.input_tokens(), 0);
    let node = lm.trace().get(lm.id()).unwrap();
    assert_eq!(node.attr, Some(Chunk::Literal(b"Answer: ".to_vec())));
}

#[test]
fn test_prompt_tokens_are_fed_once() {
    let (lm, metrics) = engine(ScriptedOracle::bytes(b"7"));
    let ctx = GenContext::new();
    let lm = lm
        .append("Q: ", &ctx)
        .unwrap()
        .append(answer_grammar(), &ctx)
        .unwrap();

    assert_eq!(lm.text(), "Q: Answer: 7");
    assert_eq!(lm.get("n"), Some(&Capture::Scalar("7".to_string())));
    // 3 prompt + 8 forced, then one per chosen digit
    assert_eq!(metrics.input_tokens(), 12);
    assert_eq!(metrics.output_tokens(), 2);
}

#[test]
fn test_chunks_in_order() {
    let (lm, _) = engine(ScriptedOracle::bytes(b"42"));
    let lm = lm.append(answer_grammar(), &GenContext::new()).unwrap();

    let mut chunks: Vec<Chunk> = lm
        .trace()
        .lineage(lm.id())
        .into_iter()
        .filter_map(|node| node.attr)
        .collect();
    chunks.reverse();
    assert_eq!(chunks.len(), 4);

    match &chunks[0] {
        Chunk::Text(text) => {
            assert_eq!(text.bytes, b"Answer: ".to_vec());
            assert!(!text.is_generated);
            assert_eq!(text.token_count, 8);
            assert_eq!(text.latency_ms, 0.0);
        }
        other => panic!("expected forced text, got {other:?}"),
    }
    for (chunk, digit) in chunks[1..3].iter().zip([b"4", b"2"]) {
        match chunk {
            Chunk::Text(text) => {
                assert_eq!(text.bytes, digit.to_vec());
                assert!(text.is_generated);
                assert_eq!(text.token_count, 1);
                assert!(text.log_prob <= 0.0);
            }
            other => panic!("expected generated text, got {other:?}"),
        }
    }
    match &chunks[3] {
        Chunk::Capture(output) => {
            assert_eq!(output.name, "n");
            assert_eq!(output.value, "42");
            assert!(!output.list_append);
        }
        other => panic!("expected capture, got {other:?}"),
    }
}

#[test]
fn test_token_limit() {
    let config = GuidanceConfig {
        max_tokens: 1,
        ..Default::default()
    };
    let client = EngineClient::new(ScriptedOracle::bytes(b"123")).with_config(&config);
    let lm = Model::new(Arc::new(client));
    let err = lm
        .append(capture("n", one_or_more(char_range(b'0', b'9'))), &GenContext::new())
        .unwrap_err();
    assert!(matches!(err, Error::TokenLimit(1)));
}

#[test]
fn test_oracle_failure() {
    let lm = Model::new(Arc::new(EngineClient::new(BrokenOracle)));
    let err = lm.append(answer_grammar(), &GenContext::new()).unwrap_err();
    assert!(matches!(err, Error::Oracle(_)));
    assert!(err.to_string().contains("device unavailable"));
}

#[test]
fn test_oracle_preference_outside_the_grammar_is_masked() {
    // The oracle wants "x", which the grammar forbids; the first legal digit wins.
    let (lm, _) = engine(ScriptedOracle::bytes(b"x"));
    let lm = lm
        .append(literal("d=") + capture("d", char_range(b'0', b'9')), &GenContext::new())
        .unwrap();
    assert_eq!(lm.text(), "d=0");
    assert_eq!(lm.get("d"), Some(&Capture::Scalar("0".to_string())));
}

#[test]
fn test_forced_text_with_a_capture_keeps_its_own_log_prob() {
    let (lm, _) = engine(ScriptedOracle::bytes(b"7"));
    let grammar = capture("k", literal("x")) + literal("=") + capture("d", char_range(b'0', b'9'));
    let lm = lm.append(grammar, &GenContext::new()).unwrap();
    assert_eq!(lm.text(), "x=7");
    assert_eq!(lm.get("k"), Some(&Capture::Scalar("x".to_string())));

    let mut chunks: Vec<Chunk> = lm
        .trace()
        .lineage(lm.id())
        .into_iter()
        .filter_map(|node| node.attr)
        .collect();
    chunks.reverse();
    match &chunks[0] {
        Chunk::Text(text) => {
            assert_eq!(text.bytes, b"x=".to_vec());
            // a settled capture marks the step generated, but no token was chosen yet
            assert!(text.is_generated);
            assert_eq!(text.log_prob, 0.0);
            assert_eq!(text.latency_ms, 0.0);
        }
        other => panic!("expected forced text, got {other:?}"),
    }
    match &chunks[1] {
        Chunk::Capture(output) => assert_eq!(output.name, "k"),
        other => panic!("expected capture, got {other:?}"),
    }
    match &chunks[2] {
        Chunk::Text(text) => {
            assert_eq!(text.bytes, b"7".to_vec());
            assert!(text.is_generated);
            assert!(text.log_prob <= 0.0);
        }
        other => panic!("expected generated text, got {other:?}"),
    }
}
