//! 错误恢复引擎
//!
//! 根据 AgentError 类型给出对外的错误处置：错误码、是否可重试、建议退避（毫秒）。
//! 模型层错误一律可重试；检查点停留在最后一次成功的转移上，客户端重试即可从断点继续。

use serde::Serialize;

use crate::core::AgentError;
use crate::llm::LlmError;

/// 线程被占用时建议的重试间隔
const THREAD_BUSY_RETRY_MS: u64 = 1000;

/// 对外错误处置（映射到 Error 流事件）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDisposition {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

/// 语义化错误处置：将错误映射为错误码与重试建议
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    backoff_ms: u64,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RecoveryEngine {
    pub fn new(backoff_ms: u64) -> Self {
        Self { backoff_ms }
    }

    pub fn handle(&self, err: &AgentError) -> ErrorDisposition {
        let retry = |code, after| ErrorDisposition {
            code,
            message: err.to_string(),
            retryable: true,
            retry_after_ms: Some(after),
        };
        let fatal = |code| ErrorDisposition {
            code,
            message: err.to_string(),
            retryable: false,
            retry_after_ms: None,
        };
        match err {
            AgentError::Llm(LlmError::RateLimited { retry_after_ms }) => {
                retry("rate_limited", *retry_after_ms)
            }
            AgentError::Llm(LlmError::Network(_)) | AgentError::Llm(LlmError::Timeout) => {
                retry("model_unavailable", self.backoff_ms)
            }
            AgentError::Llm(LlmError::MalformedOutput(_)) => {
                retry("malformed_model_output", self.backoff_ms)
            }
            AgentError::Llm(LlmError::Api(_)) => retry("model_error", self.backoff_ms),
            AgentError::ThreadBusy(_) => retry("thread_busy", THREAD_BUSY_RETRY_MS),
            AgentError::Checkpoint(_) => retry("checkpoint_failed", self.backoff_ms),
            AgentError::InvalidRequest(_) => fatal("invalid_request"),
            _ => fatal("internal_error"),
        }
    }
}
