//! 状态定义：ConversationState、单次请求 RunRequest 与执行结果 RunOutcome
//!
//! ConversationState 只被一个进行中的执行独占，只能由图节点修改，并在每次节点转移时写入检查点。

use serde::{Deserialize, Serialize};

use crate::graph::GraphNode;
use crate::memory::{validate_history, HistoryError, Message};
use crate::tools::Toolkit;

/// 一次会话的全部可变状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    /// 最终回复；只有 Final-Answer 节点可以写入
    #[serde(default)]
    pub result: String,
    pub user_id: String,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            result: String::new(),
            user_id: user_id.into(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn validate(&self) -> Result<(), HistoryError> {
        validate_history(&self.messages)
    }
}

/// 单次执行请求：开始或续跑一段会话
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub toolkits: Vec<Toolkit>,
    /// 为 true 且检查点未结束时，从检查点游标继续执行，忽略 message
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl RunRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_toolkits(mut self, toolkits: Vec<Toolkit>) -> Self {
        self.toolkits = toolkits;
        self
    }

    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }
}

/// 执行结束方式
#[derive(Clone, Debug, PartialEq)]
pub enum RunStatus {
    Completed,
    Failed { code: &'static str, message: String },
    Cancelled,
}

/// 执行结果：会话 id、最终回复、实际走过的节点路径
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub conversation_id: String,
    pub status: RunStatus,
    pub result: String,
    pub path: Vec<GraphNode>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_deserializes_with_defaults() {
        let req: RunRequest =
            serde_json::from_str(r#"{"message":"hi","toolkits":["gmail"]}"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.conversation_id.is_none());
        assert_eq!(req.toolkits, vec![Toolkit::Gmail]);
        assert!(!req.resume);
    }
}
