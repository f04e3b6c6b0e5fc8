//! 执行图端到端测试：脚本化 LLM 驱动完整的 Validation → Reasoning ⇄ ToolDispatch → FinalAnswer 流程

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kronos::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, InMemoryCheckpointStore};
use kronos::config::AppConfig;
use kronos::graph::{GraphNode, SKIPPED_RESULT};
use kronos::llm::{LlmError, MockLlmClient};
use kronos::memory::{Message, ToolCallRequest};
use kronos::stream::{EventEmitter, StreamEvent};
use kronos::tools::{StaticCatalog, ToolDescriptor, Toolkit};
use kronos::{AgentRuntime, RunRequest, RunStatus};

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.llm.provider = "mock".into();
    cfg
}

fn runtime_with_store(llm: Arc<MockLlmClient>, store: Arc<dyn CheckpointStore>) -> AgentRuntime {
    AgentRuntime::builder(config())
        .llm(llm)
        .checkpoint_store(store)
        .build()
        .unwrap()
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

fn error_code(events: &[StreamEvent]) -> Option<(String, bool, Option<u64>)> {
    events.iter().find_map(|e| match e {
        StreamEvent::Error {
            code,
            retryable,
            retry_after_ms,
            ..
        } => Some((code.clone(), *retryable, *retry_after_ms)),
        _ => None,
    })
}

#[tokio::test]
async fn test_no_toolkits_goes_straight_to_final_answer() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_stream(["Hello", " world"]);
    let rt = AgentRuntime::builder(config()).llm(llm.clone()).build().unwrap();

    let (outcome, events) = rt.run(RunRequest::new("u1", "hi")).await;
    assert!(outcome.is_completed());
    assert_eq!(
        outcome.path,
        vec![GraphNode::Validation, GraphNode::FinalAnswer]
    );
    assert!(llm.invocations().is_empty());
    assert_eq!(kinds(&events), vec!["start", "token", "token", "end"]);
    match events.last() {
        Some(StreamEvent::End {
            total_length,
            final_text,
            ..
        }) => {
            assert_eq!(final_text, "Hello world");
            assert_eq!(*total_length, "Hello world".chars().count());
        }
        other => panic!("expected end event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_add_tool_result_reaches_final_answer() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_tool_calls(vec![ToolCallRequest::new(
        "call_add",
        "add",
        json!({"a": 2, "b": 3}),
    )]);
    llm.push_signal();
    llm.push_stream(["2 + 3 = ", "5"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime_with_store(llm.clone(), store.clone());

    let request = RunRequest::new("u1", "What is 2+3?").with_toolkits(vec![Toolkit::Gmail]);
    let (outcome, events) = rt.run(request).await;
    assert!(outcome.is_completed());
    assert!(outcome.result.contains('5'));
    assert_eq!(
        outcome.path,
        vec![
            GraphNode::Validation,
            GraphNode::Reasoning,
            GraphNode::ToolDispatch,
            GraphNode::Reasoning,
            GraphNode::FinalAnswer,
        ]
    );

    let cp = store.get(&outcome.conversation_id).await.unwrap().unwrap();
    assert_eq!(cp.cursor, GraphNode::Terminated);
    assert_eq!(cp.iterations, 2);
    let add_result = cp.state.messages.iter().find_map(|m| match m {
        Message::Tool {
            tool_call_id,
            content,
            ..
        } if tool_call_id == "call_add" => Some(content.clone()),
        _ => None,
    });
    assert_eq!(add_result.as_deref(), Some("5"));
    assert!(cp.state.validate().is_ok());

    // 第二次推理能看到工具结果
    let second = &llm.invocations()[1];
    assert!(second
        .messages
        .iter()
        .any(|m| matches!(m, Message::Tool { content, .. } if content == "5")));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ProgressUpdate { message } if message == "Running add")));
}

#[tokio::test]
async fn test_unknown_tool_becomes_tool_result() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_tool_calls(vec![
        ToolCallRequest::new("c1", "add", json!({"a": 1, "b": 1})),
        ToolCallRequest::new("c2", "nope", json!({})),
        ToolCallRequest::new("c3", "add", json!({"a": 2, "b": 2})),
    ]);
    llm.push_signal();
    llm.push_stream(["done"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime_with_store(llm, store.clone());

    let request = RunRequest::new("u1", "go").with_toolkits(vec![Toolkit::Slack]);
    let (outcome, events) = rt.run(request).await;
    assert!(outcome.is_completed());
    assert!(error_code(&events).is_none());

    let cp = store.get(&outcome.conversation_id).await.unwrap().unwrap();
    let results: Vec<(String, String)> = cp
        .state
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => Some((tool_call_id.clone(), content.clone())),
            _ => None,
        })
        .collect();
    // 三个调用各有一条结果，顺序与调用一致；signal 调用在最终回答前补上确认
    assert_eq!(results.len(), 4);
    assert_eq!(results[0], ("c1".to_string(), "2".to_string()));
    assert_eq!(results[1], ("c2".to_string(), "Tool nope not found".to_string()));
    assert_eq!(results[2], ("c3".to_string(), "4".to_string()));
}

#[tokio::test]
async fn test_delegation_runs_subagent() {
    let llm = Arc::new(MockLlmClient::new());
    // 编排者：委派给 gmail 专家
    llm.push_tool_calls(vec![ToolCallRequest::new(
        "d1",
        "gmail_agent",
        json!({"task": "count unread mail"}),
    )]);
    // 子智能体：调用外部动作，然后发出信号并合成回答
    llm.push_tool_calls(vec![ToolCallRequest::new("s1", "GMAIL_COUNT_UNREAD", json!({}))]);
    llm.push_signal();
    llm.push_stream(["You have 3 unread emails."]);
    // 编排者：信号后合成最终回答
    llm.push_signal();
    llm.push_stream(["3 unread emails are waiting."]);

    let catalog = StaticCatalog::new().with_action(
        Toolkit::Gmail,
        ToolDescriptor::new(
            "GMAIL_COUNT_UNREAD",
            "Count unread mail",
            json!({"type": "object", "properties": {}}),
        ),
        |user, _| Ok(format!("3 (for {user})")),
    );
    let rt = AgentRuntime::builder(config())
        .llm(llm.clone())
        .catalog(Arc::new(catalog))
        .build()
        .unwrap();

    let request = RunRequest::new("u7", "Any unread mail?").with_toolkits(vec![Toolkit::Gmail]);
    let (outcome, events) = rt.run(request).await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.result, "3 unread emails are waiting.");

    let calls = llm.invocations();
    assert_eq!(calls.len(), 4);
    assert!(calls[0].tool_names.contains(&"gmail_agent".to_string()));
    assert!(!calls[0].tool_names.contains(&"GMAIL_COUNT_UNREAD".to_string()));
    assert!(calls[1].tool_names.contains(&"GMAIL_COUNT_UNREAD".to_string()));
    let delegated = calls[3].messages.iter().find_map(|m| match m {
        Message::Tool {
            tool_call_id,
            content,
            ..
        } if tool_call_id == "d1" => Some(content.clone()),
        _ => None,
    });
    assert_eq!(delegated.as_deref(), Some("You have 3 unread emails."));

    // 子智能体的 token 不会进入客户端流
    let tokens: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["3 unread emails are waiting."]);
}

#[tokio::test]
async fn test_sequences_increase_and_single_terminal_event() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_stream(["a", "b", "c", "d", "e"]);
    let rt = AgentRuntime::builder(config()).llm(llm).build().unwrap();

    let (_, events) = rt.run(RunRequest::new("u1", "spell")).await;
    let sequences: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().is_some_and(StreamEvent::is_terminal));
    assert_eq!(events.first().map(StreamEvent::kind), Some("start"));
}

#[tokio::test]
async fn test_iteration_cap_forces_final_answer() {
    let llm = Arc::new(MockLlmClient::new());
    for i in 0..4 {
        llm.push_tool_calls(vec![ToolCallRequest::new(
            format!("loop_{i}"),
            "add",
            json!({"a": i, "b": 1}),
        )]);
    }
    llm.push_stream(["best effort"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut cfg = config();
    cfg.agent.max_iterations = 2;
    let rt = AgentRuntime::builder(cfg)
        .llm(llm.clone())
        .checkpoint_store(store.clone())
        .build()
        .unwrap();

    let request = RunRequest::new("u1", "loop forever").with_toolkits(vec![Toolkit::Github]);
    let (outcome, events) = rt.run(request).await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.result, "best effort");
    assert_eq!(llm.invocations().len(), 2);
    assert!(events.iter().any(
        |e| matches!(e, StreamEvent::ProgressUpdate { message } if message.contains("step limit"))
    ));

    // 未执行的调用在最终回答前被补上 Skipped 结果
    let cp = store.get(&outcome.conversation_id).await.unwrap().unwrap();
    assert!(cp.state.messages.iter().any(|m| matches!(
        m,
        Message::Tool { tool_call_id, content, .. } if tool_call_id == "loop_1" && content == SKIPPED_RESULT
    )));
    assert!(cp.state.validate().is_ok());
}

#[tokio::test]
async fn test_follow_up_message_continues_conversation() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_stream(["first"]);
    llm.push_stream(["second"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime_with_store(llm.clone(), store.clone());

    let (first, events) = rt.run(RunRequest::new("u1", "one")).await;
    assert!(matches!(events[0], StreamEvent::Start { is_new: true, .. }));

    let (second, events) = rt
        .run(RunRequest::new("u1", "two").with_conversation(&first.conversation_id))
        .await;
    assert_eq!(second.conversation_id, first.conversation_id);
    assert!(matches!(events[0], StreamEvent::Start { is_new: false, .. }));
    assert_eq!(second.result, "second");

    let cp = store.get(&first.conversation_id).await.unwrap().unwrap();
    let users: Vec<&str> = cp
        .state
        .messages
        .iter()
        .filter(|m| matches!(m, Message::User { .. }))
        .map(Message::content)
        .collect();
    assert_eq!(users, vec!["one", "two"]);
    assert_eq!(cp.state.result, "second");
}

#[tokio::test]
async fn test_resume_after_model_failure_does_not_repeat_user_message() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_error(LlmError::RateLimited {
        retry_after_ms: 1500,
    });
    let store = Arc::new(InMemoryCheckpointStore::new());
    let rt = runtime_with_store(llm.clone(), store.clone());

    let request = RunRequest::new("u1", "summarize my inbox")
        .with_conversation("conv_resume")
        .with_toolkits(vec![Toolkit::Gmail]);
    let (outcome, events) = rt.run(request).await;
    assert!(matches!(outcome.status, RunStatus::Failed { code: "rate_limited", .. }));
    assert_eq!(
        error_code(&events),
        Some(("rate_limited".to_string(), true, Some(1500)))
    );
    let cp = store.get("conv_resume").await.unwrap().unwrap();
    assert_eq!(cp.cursor, GraphNode::Reasoning);

    llm.push_signal();
    llm.push_stream(["Inbox summary"]);
    let (resumed, _) = rt
        .run(RunRequest::new("u1", "").with_conversation("conv_resume").resuming())
        .await;
    assert!(resumed.is_completed());
    assert_eq!(resumed.path.first(), Some(&GraphNode::Reasoning));

    let cp = store.get("conv_resume").await.unwrap().unwrap();
    let users = cp
        .state
        .messages
        .iter()
        .filter(|m| matches!(m, Message::User { .. }))
        .count();
    assert_eq!(users, 1);
    assert_eq!(cp.toolkits, vec![Toolkit::Gmail]);
}

#[tokio::test]
async fn test_empty_message_is_invalid_request() {
    let rt = AgentRuntime::builder(config())
        .llm(Arc::new(MockLlmClient::new()))
        .build()
        .unwrap();
    let (outcome, events) = rt.run(RunRequest::new("u1", "   ")).await;
    assert!(matches!(outcome.status, RunStatus::Failed { code: "invalid_request", .. }));
    assert_eq!(kinds(&events), vec!["start", "error"]);
    assert_eq!(
        error_code(&events),
        Some(("invalid_request".to_string(), false, None))
    );
}

/// 永远写入失败的存储
struct FailingStore;

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn get(&self, _thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(None)
    }

    async fn put(&self, _thread_id: &str, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Err(CheckpointError::Backend("disk full".into()))
    }
}

#[tokio::test]
async fn test_checkpoint_failure_is_fatal_and_retryable() {
    let llm = Arc::new(MockLlmClient::new());
    let rt = runtime_with_store(llm.clone(), Arc::new(FailingStore));
    let (outcome, events) = rt.run(RunRequest::new("u1", "hello")).await;
    assert!(matches!(outcome.status, RunStatus::Failed { code: "checkpoint_failed", .. }));
    assert_eq!(kinds(&events), vec!["start", "error"]);
    assert_eq!(
        error_code(&events),
        Some(("checkpoint_failed".to_string(), true, Some(1000)))
    );
    assert!(llm.stream_invocations().is_empty());
}

#[tokio::test]
async fn test_concurrent_request_on_same_thread_is_busy() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_custom_stream(Box::pin(futures_util::stream::pending::<Result<String, LlmError>>()));
    let rt = AgentRuntime::builder(config()).llm(llm).build().unwrap();

    let first_cancel = CancellationToken::new();
    let (mut first_emitter, _first_rx) = EventEmitter::channel(first_cancel.clone());
    let engine = Arc::clone(rt.engine());
    let first = tokio::spawn(async move {
        engine
            .execute(
                RunRequest::new("u1", "slow").with_conversation("conv_busy"),
                &mut first_emitter,
            )
            .await
    });

    for _ in 0..100 {
        if rt.engine().supervisor().is_active("conv_busy") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rt.engine().supervisor().is_active("conv_busy"));

    let (outcome, events) = rt
        .run(RunRequest::new("u1", "again").with_conversation("conv_busy"))
        .await;
    assert!(matches!(outcome.status, RunStatus::Failed { code: "thread_busy", .. }));
    assert_eq!(kinds(&events), vec!["start", "error"]);
    assert_eq!(
        error_code(&events),
        Some(("thread_busy".to_string(), true, Some(1000)))
    );

    assert!(rt.cancel("conv_busy"));
    let first = first.await.unwrap();
    assert_eq!(first.status, RunStatus::Cancelled);
    assert!(!rt.engine().supervisor().is_active("conv_busy"));
}

#[tokio::test]
async fn test_malformed_toolkit_slug_is_skipped_and_turn_completes() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_signal();
    llm.push_stream(["Nothing scheduled today."]);
    let rt = AgentRuntime::builder(config()).llm(llm.clone()).build().unwrap();

    let request = RunRequest::new("u1", "What's on my calendar?").with_toolkits(vec![
        Toolkit::from_slug("google calendar"),
        Toolkit::Gmail,
    ]);
    let (outcome, events) = rt.run(request).await;
    assert!(outcome.is_completed());
    assert!(error_code(&events).is_none());

    let names = &llm.invocations()[0].tool_names;
    assert!(names.contains(&"gmail_agent".to_string()));
    assert!(names.iter().all(|n| kronos::tools::is_valid_tool_name(n)));
}
