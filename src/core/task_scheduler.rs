//! 任务调度：同一批次内工具调用的并发上限
//!
//! 同一条 Assistant 消息中的多个工具调用可并发执行，由 Semaphore 限制同时在跑的数量；跨批次天然串行。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// 工具并发限制（默认 3）
    tool_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent_tools.max(1))),
        }
    }

    /// 获取工具执行许可
    pub async fn acquire_tool(&self) -> Result<OwnedSemaphorePermit, AgentError> {
        self.tool_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Graph("tool scheduler closed".to_string()))
    }

    pub fn available(&self) -> usize {
        self.tool_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
