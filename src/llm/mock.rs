//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设的 Assistant 回复与 Token 流；脚本耗尽时 invoke 直接发出 context_ready 信号，
//! stream 回显最近一条工具结果（没有则回显最后一条用户消息），便于本地跑通整张执行图。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{AssistantReply, GenerationOptions, LlmClient, LlmError, TokenStream, ToolChoice};
use crate::memory::{Message, ToolCallRequest};
use crate::react::CONTEXT_READY_TOOL;
use crate::tools::ToolDescriptor;

/// 一次 invoke 调用的记录，供测试断言
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub tool_choice: ToolChoice,
    pub options: GenerationOptions,
}

enum StreamScript {
    Fragments(Vec<Result<String, LlmError>>),
    Custom(TokenStream),
    Fail(LlmError),
}

/// Mock 客户端：脚本化回复
#[derive(Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<AssistantReply, LlmError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    invocations: Mutex<Vec<RecordedCall>>,
    stream_invocations: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条带工具调用的回复
    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>) -> &Self {
        self.push_reply(Ok(AssistantReply {
            content: String::new(),
            tool_calls: calls,
        }))
    }

    /// 追加一条纯文本回复（无工具调用）
    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push_reply(Ok(AssistantReply {
            content: text.into(),
            tool_calls: Vec::new(),
        }))
    }

    /// 追加 context_ready 信号调用
    pub fn push_signal(&self) -> &Self {
        self.push_tool_calls(vec![signal_call()])
    }

    pub fn push_error(&self, err: LlmError) -> &Self {
        self.push_reply(Err(err))
    }

    pub fn push_reply(&self, reply: Result<AssistantReply, LlmError>) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// 追加一段最终回复的 Token 片段
    pub fn push_stream<I, S>(&self, fragments: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fragments = fragments.into_iter().map(|s| Ok(s.into())).collect();
        lock(&self.streams).push_back(StreamScript::Fragments(fragments));
        self
    }

    /// 追加自定义 Token 流（例如中途触发取消）
    pub fn push_custom_stream(&self, stream: TokenStream) -> &Self {
        lock(&self.streams).push_back(StreamScript::Custom(stream));
        self
    }

    /// 下一次 stream 调用直接失败
    pub fn push_stream_error(&self, err: LlmError) -> &Self {
        lock(&self.streams).push_back(StreamScript::Fail(err));
        self
    }

    pub fn invocations(&self) -> Vec<RecordedCall> {
        lock(&self.invocations).clone()
    }

    pub fn stream_invocations(&self) -> Vec<Vec<Message>> {
        lock(&self.stream_invocations).clone()
    }

}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 每次生成唯一 id，避免同一会话多轮之间出现重复的 tool_call id
fn signal_call() -> ToolCallRequest {
    ToolCallRequest::new(
        format!("call_signal_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        CONTEXT_READY_TOOL,
        serde_json::json!({}),
    )
}

fn echo_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m, Message::Tool { .. }))
        .or_else(|| messages.iter().rev().find(|m| matches!(m, Message::User { .. })))
        .map(|m| m.content().to_string())
        .unwrap_or_else(|| "(no input)".to_string())
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        tool_choice: ToolChoice,
        options: &GenerationOptions,
    ) -> Result<AssistantReply, LlmError> {
        lock(&self.invocations).push(RecordedCall {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            tool_choice,
            options: *options,
        });
        let next = lock(&self.replies).pop_front();
        next.unwrap_or_else(|| {
            Ok(AssistantReply {
                content: String::new(),
                tool_calls: vec![signal_call()],
            })
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<TokenStream, LlmError> {
        lock(&self.stream_invocations).push(messages.to_vec());
        let next = lock(&self.streams).pop_front();
        match next {
            Some(StreamScript::Fragments(items)) => Ok(Box::pin(stream::iter(items))),
            Some(StreamScript::Custom(s)) => Ok(s),
            Some(StreamScript::Fail(e)) => Err(e),
            None => {
                let text = echo_text(messages);
                let words: Vec<Result<String, LlmError>> = text
                    .split_inclusive(' ')
                    .map(|w| Ok(w.to_string()))
                    .collect();
                Ok(Box::pin(stream::iter(words)))
            }
        }
    }
}
