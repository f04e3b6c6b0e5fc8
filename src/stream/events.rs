//! 流事件定义
//!
//! 线上格式为 `{type, data, timestamp}`：type 取 start / token / progress_update / end / error，
//! data 为各变体字段（camelCase）。

use serde::{Deserialize, Serialize};

/// 对客户端推送的流事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum StreamEvent {
    Start {
        conversation_id: String,
        is_new: bool,
        session_id: String,
    },
    Token {
        text: String,
        sequence: u64,
    },
    ProgressUpdate {
        message: String,
    },
    End {
        total_length: usize,
        processing_time_ms: u64,
        final_text: String,
    },
    Error {
        message: String,
        code: String,
        retryable: bool,
        retry_after_ms: Option<u64>,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Token { .. } => "token",
            StreamEvent::ProgressUpdate { .. } => "progress_update",
            StreamEvent::End { .. } => "end",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// End 或 Error
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End { .. } | StreamEvent::Error { .. })
    }
}

/// 线上信封：事件 + RFC 3339 时间戳
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: StreamEvent,
    pub timestamp: String,
}

impl EventEnvelope {
    pub fn now(event: StreamEvent) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
