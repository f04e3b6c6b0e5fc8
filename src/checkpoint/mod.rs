//! 检查点：按 thread id 持久化 (ConversationState, 游标)，用于中断后续跑
//!
//! 每次节点转移写入一次；version 每次 +1，存储端据此拒绝交错写入（乐观并发）。

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{AgentError, ConversationState};
use crate::graph::GraphNode;
use crate::tools::Toolkit;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

/// 一次转移后的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub thread_id: String,
    pub state: ConversationState,
    /// 下一个要执行的节点
    pub cursor: GraphNode,
    /// 本次执行已运行的 Reasoning 次数
    pub iterations: u32,
    pub toolkits: Vec<Toolkit>,
    pub version: u64,
    /// 毫秒时间戳
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn is_terminated(&self) -> bool {
        self.cursor.is_terminal()
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt checkpoint: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("version conflict on {thread_id}: expected {expected}, got {actual}")]
    VersionConflict {
        thread_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("{0}")]
    Backend(String),
}

impl From<CheckpointError> for AgentError {
    fn from(e: CheckpointError) -> Self {
        AgentError::Checkpoint(e.to_string())
    }
}

/// 检查点存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// 写入；checkpoint.version 必须恰好比已存版本大 1（不存在时为 1）
    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// 版本校验，供各存储实现共用
pub(crate) fn check_version(
    thread_id: &str,
    existing: Option<u64>,
    incoming: u64,
) -> Result<(), CheckpointError> {
    let expected = existing.unwrap_or(0) + 1;
    if incoming != expected {
        return Err(CheckpointError::VersionConflict {
            thread_id: thread_id.to_string(),
            expected,
            actual: incoming,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample(thread_id: &str, version: u64) -> Checkpoint {
    use crate::memory::Message;
    let mut state = ConversationState::new("u1");
    state.push(Message::user("hello"));
    Checkpoint {
        thread_id: thread_id.to_string(),
        state,
        cursor: GraphNode::Reasoning,
        iterations: 0,
        toolkits: vec![Toolkit::Gmail],
        version,
        updated_at: chrono::Utc::now().timestamp_millis(),
    }
}
