//! 工具调度器
//!
//! 执行一条 Assistant 消息中的全部工具调用：同批次内并发（受 TaskScheduler 限制），全部完成后按调用顺序
//! 一次性产出 ToolResult。每个调用的失败（未知工具、执行错误、超时、子智能体失败）都被隔离成结果文本，
//! 不会中断执行图。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, TaskScheduler};
use crate::llm::GenerationOptions;
use crate::memory::{Message, ToolCallRequest};
use crate::tools::builtin::CONTEXT_READY_ACK;
use crate::tools::catalog::ToolCatalog;
use crate::tools::{ToolKind, ToolSet, Toolkit};

/// 委派执行：把一个自然语言任务交给某个 toolkit 的子智能体
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn delegate(
        &self,
        user_id: &str,
        toolkit: &Toolkit,
        task: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError>;
}

/// 一批调用共享的上下文
pub struct DispatchContext<'a> {
    pub user_id: &'a str,
    pub tools: &'a ToolSet,
    pub options: &'a GenerationOptions,
    pub cancel: &'a CancellationToken,
}

pub struct ToolDispatcher {
    catalog: Option<Arc<dyn ToolCatalog>>,
    delegator: Option<Arc<dyn Delegator>>,
    scheduler: TaskScheduler,
    tool_timeout: Duration,
    delegate_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(scheduler: TaskScheduler, tool_timeout: Duration, delegate_timeout: Duration) -> Self {
        Self {
            catalog: None,
            delegator: None,
            scheduler,
            tool_timeout,
            delegate_timeout,
        }
    }

    pub fn with_catalog(mut self, catalog: Option<Arc<dyn ToolCatalog>>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_delegator(mut self, delegator: Option<Arc<dyn Delegator>>) -> Self {
        self.delegator = delegator;
        self
    }

    /// 执行一批调用；返回的 ToolResult 与 calls 一一对应、顺序一致
    pub async fn dispatch(&self, calls: &[ToolCallRequest], ctx: &DispatchContext<'_>) -> Vec<Message> {
        let runs = calls.iter().map(|call| async move {
            let content = match self.run_one(call, ctx).await {
                Ok(content) => content,
                Err(e) if e.is_tool_error() => {
                    tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                    e.to_string()
                }
                Err(e) => {
                    tracing::info!(tool = %call.name, call_id = %call.id, error = %e, "tool call aborted");
                    e.to_string()
                }
            };
            Message::tool_result(call.id.clone(), call.name.clone(), content)
        });
        join_all(runs).await
    }

    async fn run_one(&self, call: &ToolCallRequest, ctx: &DispatchContext<'_>) -> Result<String, AgentError> {
        let record = ctx
            .tools
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        let _permit = self.scheduler.acquire_tool().await?;

        let start = Instant::now();
        let limit = match record.kind {
            ToolKind::Delegated(_) => self.delegate_timeout,
            _ => self.tool_timeout,
        };
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(AgentError::Cancelled),
            r = timeout(limit, self.invoke(&record.kind, call, ctx)) => match r {
                Ok(inner) => inner,
                Err(_) => Err(AgentError::ToolTimeout(call.name.clone())),
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(AgentError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "kind": record.kind.label(),
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn invoke(
        &self,
        kind: &ToolKind,
        call: &ToolCallRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<String, AgentError> {
        match kind {
            ToolKind::Signal => Ok(CONTEXT_READY_ACK.to_string()),
            ToolKind::Inhouse(tool) => tool
                .execute(call.args.clone())
                .await
                .map_err(AgentError::ToolExecutionFailed),
            ToolKind::Remote(_) => {
                let catalog = self
                    .catalog
                    .as_ref()
                    .ok_or_else(|| AgentError::ToolExecutionFailed("no tool catalog configured".into()))?;
                catalog
                    .execute_action(ctx.user_id, &call.name, call.args.clone())
                    .await
                    .map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))
            }
            ToolKind::Delegated(toolkit) => {
                let delegator = self
                    .delegator
                    .as_ref()
                    .ok_or_else(|| AgentError::SubagentFailed("delegation is not available here".into()))?;
                let task = call
                    .args
                    .get("task")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| AgentError::ToolExecutionFailed("missing 'task' argument".into()))?;
                delegator
                    .delegate(ctx.user_id, toolkit, task, ctx.options, ctx.cancel)
                    .await
            }
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::CONTEXT_READY_TOOL;
    use crate::tools::builtin::AddTool;
    use crate::tools::{CallerContext, StaticCatalog, Tool, ToolDescriptor, ToolRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct RecordingDelegator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Delegator for RecordingDelegator {
        async fn delegate(
            &self,
            user_id: &str,
            toolkit: &Toolkit,
            task: &str,
            _options: &GenerationOptions,
            _cancel: &CancellationToken,
        ) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if task == "fail" {
                return Err(AgentError::SubagentFailed("provider offline".into()));
            }
            Ok(format!("{toolkit} did '{task}' for {user_id}"))
        }
    }

    async fn orchestrator_tools() -> ToolSet {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool);
        registry.register(SlowTool);
        registry
            .list_tools("u1", &[Toolkit::Gmail], &CallerContext::Orchestrator)
            .await
    }

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(
            TaskScheduler::new(3),
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new(id, name, args)
    }

    #[tokio::test]
    async fn test_every_call_gets_exactly_one_result_in_order() {
        let tools = orchestrator_tools().await;
        let cancel = CancellationToken::new();
        let options = GenerationOptions::default();
        let ctx = DispatchContext {
            user_id: "u1",
            tools: &tools,
            options: &options,
            cancel: &cancel,
        };
        let calls = vec![
            call("c1", "add", json!({"a": 2, "b": 3})),
            call("c2", "nope", json!({})),
            call("c3", "slow", json!({})),
            call("c4", "add", json!({"a": "x"})),
        ];
        let results = dispatcher().dispatch(&calls, &ctx).await;
        assert_eq!(results.len(), calls.len());
        let contents: Vec<&str> = results.iter().map(|m| m.content()).collect();
        assert_eq!(contents[0], "5");
        assert_eq!(contents[1], "Tool nope not found");
        assert!(contents[2].contains("timeout"));
        assert!(contents[3].contains("invalid arguments"));
        for (msg, c) in results.iter().zip(&calls) {
            match msg {
                Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, &c.id),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_delegated_calls_route_to_delegator() {
        let tools = orchestrator_tools().await;
        let delegator = Arc::new(RecordingDelegator {
            calls: AtomicUsize::new(0),
        });
        let d = dispatcher().with_delegator(Some(delegator.clone()));
        let cancel = CancellationToken::new();
        let options = GenerationOptions::default();
        let ctx = DispatchContext {
            user_id: "u1",
            tools: &tools,
            options: &options,
            cancel: &cancel,
        };
        let results = d
            .dispatch(
                &[
                    call("c1", "gmail_agent", json!({"task": "read inbox"})),
                    call("c2", "gmail_agent", json!({"task": "fail"})),
                    call("c3", "gmail_agent", json!({})),
                    call("c4", CONTEXT_READY_TOOL, json!({})),
                ],
                &ctx,
            )
            .await;
        assert_eq!(results[0].content(), "gmail did 'read inbox' for u1");
        assert!(results[1].content().contains("provider offline"));
        assert!(results[2].content().contains("missing 'task'"));
        assert_eq!(results[3].content(), CONTEXT_READY_ACK);
        assert_eq!(delegator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remote_actions_use_catalog() {
        let catalog = Arc::new(StaticCatalog::new().with_action(
            Toolkit::Slack,
            ToolDescriptor::new("SLACK_POST", "Post", json!({"type": "object"})),
            |user, args| Ok(format!("posted {} as {user}", args["text"])),
        ));
        let registry = ToolRegistry::new().with_catalog(catalog.clone());
        let tools = registry
            .list_tools("u9", &[Toolkit::Slack], &CallerContext::Subagent(Toolkit::Slack))
            .await;
        let d = dispatcher().with_catalog(Some(catalog));
        let cancel = CancellationToken::new();
        let options = GenerationOptions::default();
        let ctx = DispatchContext {
            user_id: "u9",
            tools: &tools,
            options: &options,
            cancel: &cancel,
        };
        let results = d
            .dispatch(&[call("c1", "SLACK_POST", json!({"text": "hi"}))], &ctx)
            .await;
        assert_eq!(results[0].content(), "posted \"hi\" as u9");
    }

    #[tokio::test]
    async fn test_cancelled_batch_still_accounts_every_call() {
        let tools = orchestrator_tools().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = GenerationOptions::default();
        let ctx = DispatchContext {
            user_id: "u1",
            tools: &tools,
            options: &options,
            cancel: &cancel,
        };
        let results = dispatcher()
            .dispatch(&[call("c1", "slow", json!({})), call("c2", "add", json!({"a":1,"b":1}))], &ctx)
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content(), "Cancelled");
    }
}
