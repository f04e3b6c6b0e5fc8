//! 执行图构建器
//!
//! 提供流畅的 API 组装 ExecutionEngine：LLM、工具注册表、检查点存储等协作者全部显式注入。

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::core::{RecoveryEngine, SessionSupervisor, TaskScheduler};
use crate::graph::{ExecutionEngine, GraphError, RouterFn, TransitionTable};
use crate::llm::{GenerationOptions, LlmClient};
use crate::react::Planner;
use crate::tools::{CallerContext, Delegator, ToolDispatcher, ToolRegistry};

/// 执行图构建器
pub struct GraphBuilder {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    store: Option<Arc<dyn CheckpointStore>>,
    supervisor: Option<Arc<SessionSupervisor>>,
    delegator: Option<Arc<dyn Delegator>>,
    caller: CallerContext,
    transitions: TransitionTable,
    recovery: RecoveryEngine,
    options: GenerationOptions,
    max_iterations: u32,
    max_concurrent_tools: usize,
    tool_timeout: Duration,
    delegate_timeout: Duration,
}

impl GraphBuilder {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            store: None,
            supervisor: None,
            delegator: None,
            caller: CallerContext::Orchestrator,
            transitions: TransitionTable::default(),
            recovery: RecoveryEngine::default(),
            options: GenerationOptions::default(),
            max_iterations: 8,
            max_concurrent_tools: 3,
            tool_timeout: Duration::from_secs(30),
            delegate_timeout: Duration::from_secs(120),
        }
    }

    /// 设置检查点存储（默认内存）
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<SessionSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// 设置委派执行器（仅编排者需要）
    pub fn delegator(mut self, delegator: Arc<dyn Delegator>) -> Self {
        self.delegator = Some(delegator);
        self
    }

    pub fn caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }

    /// 替换路由函数（保持标准转移表结构）
    pub fn router(mut self, router: RouterFn) -> Self {
        self.transitions = TransitionTable::standard(router);
        self
    }

    pub fn transitions(mut self, table: TransitionTable) -> Self {
        self.transitions = table;
        self
    }

    pub fn recovery(mut self, recovery: RecoveryEngine) -> Self {
        self.recovery = recovery;
        self
    }

    /// 默认生成参数（请求可覆盖）
    pub fn generation(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn max_concurrent_tools(mut self, n: usize) -> Self {
        self.max_concurrent_tools = n;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn delegate_timeout(mut self, timeout: Duration) -> Self {
        self.delegate_timeout = timeout;
        self
    }

    /// 构建执行图
    pub fn build(self) -> Result<ExecutionEngine, GraphError> {
        self.transitions.validate()?;
        if self.max_iterations == 0 {
            return Err(GraphError::InvalidConfiguration(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let dispatcher = ToolDispatcher::new(
            TaskScheduler::new(self.max_concurrent_tools),
            self.tool_timeout,
            self.delegate_timeout,
        )
        .with_catalog(self.registry.catalog())
        .with_delegator(self.delegator);

        Ok(ExecutionEngine {
            planner: Planner::new(self.llm, self.caller),
            registry: self.registry,
            dispatcher,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new())),
            supervisor: self.supervisor.unwrap_or_default(),
            transitions: self.transitions,
            recovery: self.recovery,
            options: self.options,
            max_iterations: self.max_iterations,
        })
    }
}
