//! 记忆层：对话消息模型与历史不变量校验

pub mod conversation;

pub use conversation::{pending_tool_calls, validate_history, HistoryError, Message, ToolCallRequest};
