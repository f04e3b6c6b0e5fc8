//! Agent 错误类型
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定错误码、是否可重试与建议退避时长。
//! 工具类错误（未知工具、执行失败、超时、子智能体失败）只在调度层内部出现，会被转成 Tool 结果，不会终止执行图。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool {0} not found")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Subagent failed: {0}")]
    SubagentFailed(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Conversation {0} is already being processed")]
    ThreadBusy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否属于工具层错误（非致命，转成 Tool 结果）
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
                | AgentError::SubagentFailed(_)
        )
    }
}
