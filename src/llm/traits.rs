//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：invoke（可带工具 schema 与 tool_choice，返回一条 Assistant 回复）、
//! stream（仅 Final-Answer 节点使用，返回 Token 流）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolDescriptor;

/// 模型层错误：对当前轮致命，统一以可重试 Error 事件上报
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("provider error: {0}")]
    Api(String),
}

/// 工具选择策略；Reasoning 节点使用 Required（每轮至少一个结构化决策）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// 单次请求的生成参数（由配置默认值与请求级覆盖合并而来）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
        }
    }
}

impl GenerationOptions {
    /// 用请求级参数覆盖默认值
    pub fn with_overrides(self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        Self {
            temperature: temperature.unwrap_or(self.temperature),
            max_tokens: max_tokens.unwrap_or(self.max_tokens),
        }
    }
}

/// 模型的一次非流式回复：自由文本 + 结构化工具调用
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantReply {
    pub fn into_message(self) -> Message {
        Message::assistant_with_calls(self.content, self.tool_calls)
    }
}

/// Token 片段流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait：结构化调用与流式文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式调用；tools 为空时 tool_choice 被忽略
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        tool_choice: ToolChoice,
        options: &GenerationOptions,
    ) -> Result<AssistantReply, LlmError>;

    /// 流式完成（不带工具），返回 Token 流
    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<TokenStream, LlmError>;
}
