//! 无头 Agent 运行时
//!
//! 供 HTTP API 与 CLI 调用：按配置组装 LLM、工具注册表（本地工具 + 可选 Composio 目录）、
//! 子智能体工厂、检查点存储与会话监管，得到一个编排者 ExecutionEngine。
//! `stream` 在后台任务中执行一次请求并通过 mpsc 推送 StreamEvent；调用方丢弃接收端或取消令牌即可中止执行。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use crate::config::{AppConfig, CheckpointBackend};
use crate::core::{AgentError, RecoveryEngine, RunOutcome, RunRequest, SessionSupervisor};
use crate::graph::{ExecutionEngine, GraphBuilder};
use crate::llm::{GenerationOptions, LlmClient, MockLlmClient, OpenAiClient};
use crate::stream::{EventEmitter, StreamEvent};
use crate::tools::{
    AddTool, ComposioCatalog, NormalizeOptions, SubagentFactory, SubagentSettings, ToolCatalog,
    ToolRegistry,
};

/// 根据配置创建 LLM 客户端：provider = mock 时使用脚本化客户端，其余走 OpenAI 兼容端点
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.as_str() {
        "mock" => {
            tracing::warn!("llm provider is mock, replies are scripted");
            Arc::new(MockLlmClient::new())
        }
        other => {
            if other != "openai" {
                tracing::info!(provider = other, "treating provider as OpenAI-compatible");
            }
            let api_key = cfg.llm.resolved_api_key();
            if api_key.is_none() {
                tracing::warn!("no llm api key configured");
            }
            Arc::new(
                OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    api_key.as_deref(),
                    cfg.llm.timeouts.request,
                )
                .with_stream_timeout(cfg.llm.timeouts.stream),
            )
        }
    }
}

/// 组装运行时；未显式注入的协作者按配置创建
pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            catalog: None,
            store: None,
        }
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<AgentRuntime, AgentError> {
        let cfg = self.config;
        cfg.validate()?;

        let llm = self.llm.unwrap_or_else(|| create_llm_from_config(&cfg));

        let catalog = self.catalog.or_else(|| {
            cfg.composio.resolved_api_key().map(|key| {
                tracing::info!(base_url = %cfg.composio.base_url, "composio catalog enabled");
                Arc::new(ComposioCatalog::new(
                    &cfg.composio.base_url,
                    Some(key),
                    cfg.composio.timeout_secs,
                )) as Arc<dyn ToolCatalog>
            })
        });

        let mut registry = ToolRegistry::new().with_normalize_options(NormalizeOptions {
            max_depth: cfg.agent.schema_max_depth,
        });
        registry.register(AddTool);
        if let Some(catalog) = catalog {
            registry = registry.with_catalog(catalog);
        }
        let registry = Arc::new(registry);

        let tool_timeout = Duration::from_secs(cfg.agent.tool_timeout_secs.max(1));
        let subagents = Arc::new(SubagentFactory::new(
            Arc::clone(&llm),
            Arc::clone(&registry),
            SubagentSettings {
                max_iterations: cfg.agent.subagent_max_iterations,
                max_concurrent_tools: cfg.agent.max_concurrent_tools,
                tool_timeout,
            },
        ));

        let store = self.store.unwrap_or_else(|| match cfg.checkpoint.backend {
            CheckpointBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
            CheckpointBackend::File => {
                tracing::info!(dir = %cfg.checkpoint.dir.display(), "file checkpoint store");
                Arc::new(FileCheckpointStore::new(&cfg.checkpoint.dir))
            }
        });

        let engine = GraphBuilder::new(llm, registry)
            .checkpoint_store(store)
            .supervisor(Arc::new(SessionSupervisor::default()))
            .delegator(subagents)
            .recovery(RecoveryEngine::new(cfg.agent.retry_backoff_ms))
            .generation(GenerationOptions {
                temperature: cfg.llm.temperature,
                max_tokens: cfg.llm.max_tokens,
            })
            .max_iterations(cfg.agent.max_iterations)
            .max_concurrent_tools(cfg.agent.max_concurrent_tools)
            .tool_timeout(tool_timeout)
            .delegate_timeout(Duration::from_secs(cfg.agent.subagent_timeout_secs.max(1)))
            .build()
            .map_err(|e| AgentError::ConfigError(e.to_string()))?;

        Ok(AgentRuntime {
            engine: Arc::new(engine),
            config: cfg,
        })
    }
}

/// 编排者运行时，可在多个请求间共享（Clone 廉价）
#[derive(Clone)]
pub struct AgentRuntime {
    engine: Arc<ExecutionEngine>,
    config: AppConfig,
}

impl AgentRuntime {
    pub fn builder(config: AppConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn from_config(config: AppConfig) -> Result<Self, AgentError> {
        RuntimeBuilder::new(config).build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// 在后台执行请求；返回事件接收端与本次执行的取消令牌
    pub fn stream(&self, request: RunRequest) -> (mpsc::UnboundedReceiver<StreamEvent>, CancellationToken) {
        let cancel = CancellationToken::new();
        let (mut emitter, rx) = EventEmitter::channel(cancel.clone());
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let outcome = engine.execute(request, &mut emitter).await;
            tracing::debug!(
                conversation_id = %outcome.conversation_id,
                status = ?outcome.status,
                "background execution finished"
            );
        });
        (rx, cancel)
    }

    /// 执行到结束，同时收集全部事件
    pub async fn run(&self, request: RunRequest) -> (RunOutcome, Vec<StreamEvent>) {
        let (mut emitter, mut rx) = EventEmitter::channel(CancellationToken::new());
        let outcome = self.engine.execute(request, &mut emitter).await;
        drop(emitter);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    /// 取消某个会话上正在进行的执行
    pub fn cancel(&self, conversation_id: &str) -> bool {
        self.engine.supervisor().cancel(conversation_id)
    }
}
