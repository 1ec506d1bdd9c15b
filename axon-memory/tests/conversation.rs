use std::sync::Arc;

use axon::{CancellationToken, Flow, FlowError};
use axon_memory::Conversation;
use axon_store_memory::MemoryStore;

async fn run_through(
    flow: &Flow,
    input: impl axon::InputSource,
) -> Result<String, FlowError> {
    let mut out = String::new();
    flow.run(&CancellationToken::new(), input, &mut out).await?;
    Ok(out)
}

// --- Input handler ---

#[tokio::test]
async fn first_input_emits_single_user_line() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.input("u"));

    let out = run_through(&flow, "Hi").await.unwrap();
    assert_eq!(out, "user: Hi");
}

#[tokio::test]
async fn transcript_accumulates_across_turns() {
    let memory = Conversation::new();

    let input = Flow::new().then(memory.input("u"));
    let output = Flow::new().then(memory.output("u"));

    run_through(&input, "Hi").await.unwrap();
    run_through(&output, "Hello").await.unwrap();
    let transcript = run_through(&input, "How?").await.unwrap();

    assert_eq!(transcript, "user: Hi\nassistant: Hello\nuser: How?");
}

#[tokio::test]
async fn input_trims_surrounding_whitespace() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.input("u"));

    let out = run_through(&flow, "  spaced out \n").await.unwrap();
    assert_eq!(out, "user: spaced out");
}

#[tokio::test]
async fn whitespace_only_input_fails() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.input("u"));

    let err = run_through(&flow, "  \n\t ").await.unwrap_err();
    assert!(matches!(err, FlowError::EmptyInput));
}

// --- Output handler ---

#[tokio::test]
async fn output_streams_through_and_records() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.output("u"));

    let out = run_through(&flow, "Hello there").await.unwrap();
    assert_eq!(out, "Hello there");

    let info = memory.info("u").await.unwrap();
    assert!(info.exists);
    assert_eq!(info.message_count, 1);
}

#[tokio::test]
async fn empty_output_records_nothing() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.output("u"));

    run_through(&flow, "").await.unwrap();

    let info = memory.info("u").await.unwrap();
    assert!(!info.exists);
    assert_eq!(info.message_count, 0);
}

#[tokio::test]
async fn binary_content_roundtrips() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.output("bin"));

    let payload: Vec<u8> = vec![0, 255, 128, 7, 1];
    let mut out: Vec<u8> = Vec::new();
    flow.run(&CancellationToken::new(), payload.clone(), &mut out)
        .await
        .unwrap();
    assert_eq!(out, payload);

    // a second turn replays the stored record without corruption
    let info = memory.info("bin").await.unwrap();
    assert_eq!(info.message_count, 1);
}

// --- Alternation invariant ---

#[tokio::test]
async fn roles_alternate_starting_with_user() {
    let memory = Conversation::new();
    let input = Flow::new().then(memory.input("chat"));
    let output = Flow::new().then(memory.output("chat"));

    for turn in 0..3 {
        run_through(&input, format!("question {turn}").as_str())
            .await
            .unwrap();
        run_through(&output, format!("answer {turn}").as_str())
            .await
            .unwrap();
    }

    let transcript = run_through(&input, "final").await.unwrap();
    let lines: Vec<&str> = transcript.lines().collect();
    assert_eq!(lines.len(), 7);
    for (i, line) in lines.iter().enumerate() {
        if i % 2 == 0 {
            assert!(line.starts_with("user: "), "line {i}: {line}");
        } else {
            assert!(line.starts_with("assistant: "), "line {i}: {line}");
        }
    }
}

// --- Helpers ---

#[tokio::test]
async fn info_on_missing_key() {
    let memory = Conversation::new();
    let info = memory.info("ghost").await.unwrap();
    assert!(!info.exists);
    assert_eq!(info.message_count, 0);
}

#[tokio::test]
async fn clear_removes_record() {
    let memory = Conversation::new();
    let flow = Flow::new().then(memory.input("u"));
    run_through(&flow, "Hi").await.unwrap();

    memory.clear("u").await.unwrap();

    let info = memory.info("u").await.unwrap();
    assert!(!info.exists);
}

#[tokio::test]
async fn list_keys_sees_all_conversations() {
    let store = Arc::new(MemoryStore::new());
    let memory = Conversation::with_store(store);

    run_through(&Flow::new().then(memory.input("a")), "x")
        .await
        .unwrap();
    run_through(&Flow::new().then(memory.input("b")), "y")
        .await
        .unwrap();

    let mut keys = memory.list_keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);
}

#[tokio::test]
async fn separate_keys_are_isolated() {
    let memory = Conversation::new();
    let flow_a = Flow::new().then(memory.input("a"));
    let flow_b = Flow::new().then(memory.input("b"));

    run_through(&flow_a, "for a").await.unwrap();
    let out = run_through(&flow_b, "for b").await.unwrap();
    assert_eq!(out, "user: for b");
}
