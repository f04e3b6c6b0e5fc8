//! 对话消息：System / User / Assistant（可带 Tool Call）/ Tool Result
//!
//! 消息只追加、不重排、不删除；每条 Tool 消息必须引用紧邻的前一条 Assistant 消息中的 tool_call_id。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型发起的单次工具调用：id 在同一轮 Assistant 消息内唯一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// 单条消息（按 role 打标签序列化）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    /// Assistant 消息中的工具调用；其它类型返回空切片
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }
}

/// 消息序列不满足「Tool 结果引用紧邻 Assistant 调用」时的描述
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("tool result at index {index} has no preceding assistant turn")]
    OrphanToolResult { index: usize },
    #[error("tool result at index {index} references unknown call id '{tool_call_id}'")]
    UnknownCallId { index: usize, tool_call_id: String },
    #[error("tool call id '{tool_call_id}' answered twice")]
    DuplicateResult { tool_call_id: String },
    #[error("duplicate tool call id '{tool_call_id}' within one assistant turn")]
    DuplicateCallId { tool_call_id: String },
}

/// 校验整段历史：每条 Tool 消息都落在某条 Assistant 消息之后的连续结果块里，且 id 可对应
pub fn validate_history(messages: &[Message]) -> Result<(), HistoryError> {
    let mut open: Option<(HashSet<&str>, HashSet<&str>)> = None;
    for (index, msg) in messages.iter().enumerate() {
        match msg {
            Message::Assistant { tool_calls, .. } => {
                let mut ids = HashSet::new();
                for call in tool_calls {
                    if !ids.insert(call.id.as_str()) {
                        return Err(HistoryError::DuplicateCallId {
                            tool_call_id: call.id.clone(),
                        });
                    }
                }
                open = Some((ids, HashSet::new()));
            }
            Message::Tool { tool_call_id, .. } => {
                let (ids, answered) = open
                    .as_mut()
                    .ok_or(HistoryError::OrphanToolResult { index })?;
                if !ids.contains(tool_call_id.as_str()) {
                    return Err(HistoryError::UnknownCallId {
                        index,
                        tool_call_id: tool_call_id.clone(),
                    });
                }
                if !answered.insert(tool_call_id.as_str()) {
                    return Err(HistoryError::DuplicateResult {
                        tool_call_id: tool_call_id.clone(),
                    });
                }
            }
            Message::System { .. } | Message::User { .. } => open = None,
        }
    }
    Ok(())
}

/// 最后一轮 Assistant 调用中尚未得到结果的工具调用（按调用顺序）
pub fn pending_tool_calls(messages: &[Message]) -> Vec<ToolCallRequest> {
    let Some(pos) = messages
        .iter()
        .rposition(|m| matches!(m, Message::Assistant { .. }))
    else {
        return Vec::new();
    };
    let answered: HashSet<&str> = messages[pos + 1..]
        .iter()
        .filter_map(|m| match m {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    messages[pos]
        .tool_calls()
        .iter()
        .filter(|c| !answered.contains(c.id.as_str()))
        .cloned()
        .collect()
}
