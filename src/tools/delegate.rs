//! 子智能体工厂
//!
//! 每个 toolkit 懒构建并缓存一个嵌套 ExecutionEngine（调用方上下文为该 toolkit），编排者通过 `<slug>_agent`
//! 工具把任务委派给它。子智能体使用独立的内存检查点存储与分离的事件发射器（不向客户端推送），
//! 取消令牌继承自父执行。子智能体看不到委派工具，嵌套深度固定为 1。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::InMemoryCheckpointStore;
use crate::core::{AgentError, RunRequest, RunStatus};
use crate::graph::{ExecutionEngine, GraphBuilder};
use crate::llm::{GenerationOptions, LlmClient};
use crate::stream::EventEmitter;
use crate::tools::{CallerContext, Delegator, ToolRegistry, Toolkit};

/// 子智能体的执行限制
#[derive(Debug, Clone, Copy)]
pub struct SubagentSettings {
    pub max_iterations: u32,
    pub max_concurrent_tools: usize,
    pub tool_timeout: Duration,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_concurrent_tools: 3,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

struct Subagent {
    engine: ExecutionEngine,
    store: Arc<InMemoryCheckpointStore>,
}

/// 委派结束时删除子线程检查点；委派被超时或取消丢弃时同样生效
struct ThreadCleanup {
    store: Arc<InMemoryCheckpointStore>,
    thread_id: String,
}

impl Drop for ThreadCleanup {
    fn drop(&mut self) {
        self.store.discard(&self.thread_id);
    }
}

pub struct SubagentFactory {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    settings: SubagentSettings,
    cache: Mutex<HashMap<Toolkit, Arc<Subagent>>>,
}

impl SubagentFactory {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, settings: SubagentSettings) -> Self {
        Self {
            llm,
            registry,
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 已构建的子智能体数量
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn subagent(&self, toolkit: &Toolkit) -> Result<Arc<Subagent>, AgentError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = cache.get(toolkit) {
            return Ok(Arc::clone(existing));
        }
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = GraphBuilder::new(Arc::clone(&self.llm), Arc::clone(&self.registry))
            .caller(CallerContext::Subagent(toolkit.clone()))
            .checkpoint_store(store.clone())
            .max_iterations(self.settings.max_iterations)
            .max_concurrent_tools(self.settings.max_concurrent_tools)
            .tool_timeout(self.settings.tool_timeout)
            .build()
            .map_err(|e| AgentError::Graph(e.to_string()))?;
        tracing::debug!(toolkit = %toolkit, "subagent built");
        let subagent = Arc::new(Subagent { engine, store });
        cache.insert(toolkit.clone(), Arc::clone(&subagent));
        Ok(subagent)
    }
}

#[async_trait]
impl Delegator for SubagentFactory {
    async fn delegate(
        &self,
        user_id: &str,
        toolkit: &Toolkit,
        task: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let subagent = self.subagent(toolkit)?;
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let thread_id = format!("sub_{}_{}", toolkit.slug(), &hex[..8]);
        let request = RunRequest {
            message: task.to_string(),
            conversation_id: Some(thread_id.clone()),
            user_id: user_id.to_string(),
            toolkits: vec![toolkit.clone()],
            resume: false,
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
        };
        tracing::info!(toolkit = %toolkit, thread_id = %thread_id, "delegating task");

        let _cleanup = ThreadCleanup {
            store: Arc::clone(&subagent.store),
            thread_id,
        };
        let mut emitter = EventEmitter::detached(cancel.child_token());
        let outcome = subagent.engine.execute(request, &mut emitter).await;

        match outcome.status {
            RunStatus::Completed => Ok(outcome.result),
            RunStatus::Failed { code, message } => Err(AgentError::SubagentFailed(format!(
                "{} specialist failed ({code}): {message}",
                toolkit.display_name()
            ))),
            RunStatus::Cancelled => Err(AgentError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::memory::ToolCallRequest;
    use crate::tools::{ToolDescriptor, StaticCatalog};
    use serde_json::json;

    fn factory(llm: Arc<MockLlmClient>) -> SubagentFactory {
        let catalog = StaticCatalog::new().with_action(
            Toolkit::Gmail,
            ToolDescriptor::new(
                "GMAIL_COUNT_UNREAD",
                "Count unread mail",
                json!({"type": "object", "properties": {}}),
            ),
            |_, _| Ok("3".into()),
        );
        let registry = Arc::new(ToolRegistry::new().with_catalog(Arc::new(catalog)));
        SubagentFactory::new(llm, registry, SubagentSettings::default())
    }

    #[tokio::test]
    async fn test_delegate_runs_nested_engine() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_tool_calls(vec![ToolCallRequest::new("s1", "GMAIL_COUNT_UNREAD", json!({}))]);
        llm.push_signal();
        llm.push_stream(["You have ", "3 unread emails."]);

        let f = factory(llm.clone());
        let out = f
            .delegate(
                "u1",
                &Toolkit::Gmail,
                "How many unread emails?",
                &GenerationOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "You have 3 unread emails.");

        let first = &llm.invocations()[0];
        assert!(first.tool_names.contains(&"GMAIL_COUNT_UNREAD".to_string()));
        assert!(!first.tool_names.iter().any(|n| n.ends_with("_agent")));
        assert_eq!(f.cached(), 1);
    }

    #[tokio::test]
    async fn test_engine_is_cached_per_toolkit() {
        let llm = Arc::new(MockLlmClient::new());
        let f = factory(llm);
        let opts = GenerationOptions::default();
        let cancel = CancellationToken::new();
        f.delegate("u1", &Toolkit::Gmail, "a", &opts, &cancel).await.unwrap();
        f.delegate("u1", &Toolkit::Gmail, "b", &opts, &cancel).await.unwrap();
        f.delegate("u1", &Toolkit::Slack, "c", &opts, &cancel).await.unwrap();
        assert_eq!(f.cached(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_delegation_leaves_no_checkpoint() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_signal();
        llm.push_custom_stream(Box::pin(futures_util::stream::pending::<Result<String, LlmError>>()));
        let f = factory(llm);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(200),
            f.delegate(
                "u1",
                &Toolkit::Gmail,
                "summarize the inbox",
                &GenerationOptions::default(),
                &CancellationToken::new(),
            ),
        )
        .await;
        assert!(timed_out.is_err());

        let subagent = f.subagent(&Toolkit::Gmail).unwrap();
        assert!(subagent.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_finished_delegation_leaves_no_checkpoint() {
        let llm = Arc::new(MockLlmClient::new());
        let f = factory(llm);
        f.delegate(
            "u1",
            &Toolkit::Gmail,
            "anything new?",
            &GenerationOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let subagent = f.subagent(&Toolkit::Gmail).unwrap();
        assert!(subagent.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_model_failure_becomes_subagent_error() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::Api("bad request".into()));
        let f = factory(llm);
        let err = f
            .delegate(
                "u1",
                &Toolkit::Gmail,
                "x",
                &GenerationOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SubagentFailed(ref m) if m.contains("model_error")));
    }
}
