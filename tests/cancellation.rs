//! 取消语义：流中途取消后不再发 Token / End，部分文本丢弃，检查点停在 FinalAnswer，可续跑

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kronos::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use kronos::config::AppConfig;
use kronos::graph::GraphNode;
use kronos::llm::{LlmError, MockLlmClient, TokenStream};
use kronos::memory::Message;
use kronos::stream::{EventEmitter, StreamEvent};
use kronos::{AgentRuntime, RunRequest, RunStatus};

/// 产出三个片段后取消令牌，然后一直挂起
fn cancelling_stream(cancel: CancellationToken) -> TokenStream {
    Box::pin(futures_util::stream::unfold(0usize, move |i| {
        let cancel = cancel.clone();
        async move {
            if i < 3 {
                Some((Ok::<String, LlmError>(format!("part{i} ")), i + 1))
            } else {
                cancel.cancel();
                futures_util::future::pending::<()>().await;
                None
            }
        }
    }))
}

fn runtime(llm: Arc<MockLlmClient>, store: Arc<InMemoryCheckpointStore>) -> AgentRuntime {
    let mut cfg = AppConfig::default();
    cfg.llm.provider = "mock".into();
    AgentRuntime::builder(cfg)
        .llm(llm)
        .checkpoint_store(store)
        .build()
        .unwrap()
}

async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn test_cancel_mid_stream_emits_no_terminal_event() {
    let cancel = CancellationToken::new();
    let llm = Arc::new(MockLlmClient::new());
    llm.push_custom_stream(cancelling_stream(cancel.clone()));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime(llm, store.clone());

    let (mut emitter, rx) = EventEmitter::channel(cancel.clone());
    let outcome = rt
        .engine()
        .execute(
            RunRequest::new("u1", "tell me a story").with_conversation("conv_cancel"),
            &mut emitter,
        )
        .await;
    drop(emitter);
    let events = drain(rx).await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    let tokens = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Token { .. }))
        .count();
    assert_eq!(tokens, 3);
    assert!(!events.iter().any(StreamEvent::is_terminal));
    assert!(matches!(events.last(), Some(StreamEvent::Token { sequence: 3, .. })));

    let cp = store.get("conv_cancel").await.unwrap().unwrap();
    assert_eq!(cp.cursor, GraphNode::FinalAnswer);
    assert!(cp.state.result.is_empty());
    assert!(!cp
        .state
        .messages
        .iter()
        .any(|m| matches!(m, Message::Assistant { .. })));
}

#[tokio::test]
async fn test_resume_after_cancel_synthesizes_again() {
    let cancel = CancellationToken::new();
    let llm = Arc::new(MockLlmClient::new());
    llm.push_custom_stream(cancelling_stream(cancel.clone()));
    llm.push_stream(["The ", "whole ", "story."]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime(llm.clone(), store.clone());

    let (mut emitter, _rx) = EventEmitter::channel(cancel);
    let first = rt
        .engine()
        .execute(
            RunRequest::new("u1", "tell me a story").with_conversation("conv_again"),
            &mut emitter,
        )
        .await;
    assert_eq!(first.status, RunStatus::Cancelled);

    let (resumed, events) = rt
        .run(RunRequest::new("u1", "").with_conversation("conv_again").resuming())
        .await;
    assert!(resumed.is_completed());
    assert_eq!(resumed.result, "The whole story.");
    assert_eq!(resumed.path, vec![GraphNode::FinalAnswer]);
    assert!(matches!(events[0], StreamEvent::Start { is_new: false, .. }));

    // 续跑时的合成输入不含被丢弃的部分文本
    let synth_inputs = llm.stream_invocations();
    assert_eq!(synth_inputs.len(), 2);
    assert!(!synth_inputs[1]
        .iter()
        .any(|m| m.content().contains("part0")));

    let cp = store.get("conv_again").await.unwrap().unwrap();
    assert_eq!(cp.cursor, GraphNode::Terminated);
    let assistants = cp
        .state
        .messages
        .iter()
        .filter(|m| matches!(m, Message::Assistant { .. }))
        .count();
    assert_eq!(assistants, 1);
}

#[tokio::test]
async fn test_dropping_receiver_cancels_run() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_stream(["a", "b", "c"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime(llm, store);

    let (rx, cancel) = rt.stream(RunRequest::new("u1", "hi").with_conversation("conv_gone"));
    drop(rx);
    cancel.cancelled().await;
    assert!(cancel.is_cancelled());
}
