//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持函数调用（tools + tool_choice）与流式输出。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestToolMessage,
    ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionToolChoiceOption,
    ChatCompletionTools, CreateChatCompletionRequest, FunctionCall, FunctionObject,
    ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::time::timeout;
use tracing::debug;

use crate::llm::{AssistantReply, GenerationOptions, LlmClient, LlmError, TokenStream, ToolChoice};
use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolDescriptor;

/// 限流时未给出等待时长的默认退避
const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 2000;

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    /// 流式输出相邻两个分片之间的最长等待
    stream_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, request_timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs.max(1)),
            stream_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_stream_timeout(mut self, secs: u64) -> Self {
        self.stream_timeout = Duration::from_secs(secs.max(1));
        self
    }

    fn to_openai_messages(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System { content } => ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(content.clone()),
                    name: None,
                }
                .into(),
                Message::User { content } => ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(content.clone()),
                    name: None,
                }
                .into(),
                Message::Assistant { content, tool_calls } => {
                    let calls = (!tool_calls.is_empty()).then(|| {
                        tool_calls
                            .iter()
                            .map(|c| {
                                ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                                    id: c.id.clone(),
                                    function: FunctionCall {
                                        name: c.name.clone(),
                                        arguments: c.args.to_string(),
                                    },
                                })
                            })
                            .collect()
                    });
                    let text = (!content.is_empty())
                        .then(|| ChatCompletionRequestAssistantMessageContent::Text(content.clone()));
                    #[allow(deprecated)]
                    ChatCompletionRequestAssistantMessage {
                        content: text,
                        name: None,
                        tool_calls: calls,
                        function_call: None,
                        refusal: None,
                        audio: None,
                    }
                    .into()
                }
                Message::Tool {
                    tool_call_id,
                    content,
                    ..
                } => ChatCompletionRequestToolMessage {
                    content: ChatCompletionRequestToolMessageContent::Text(content.clone()),
                    tool_call_id: tool_call_id.clone(),
                }
                .into(),
            })
            .collect()
    }

    fn to_openai_tools(tools: &[ToolDescriptor]) -> Vec<ChatCompletionTools> {
        tools
            .iter()
            .map(|t| {
                ChatCompletionTools::Function(ChatCompletionTool {
                    function: FunctionObject {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                        strict: None,
                    },
                })
            })
            .collect()
    }

    fn to_openai_tool_choice(choice: ToolChoice) -> ChatCompletionToolChoiceOption {
        let mode = match choice {
            ToolChoice::Auto => ToolChoiceOptions::Auto,
            ToolChoice::None => ToolChoiceOptions::None,
            ToolChoice::Required => ToolChoiceOptions::Required,
        };
        ChatCompletionToolChoiceOption::Mode(mode)
    }
}

/// 将 provider 错误映射为 LlmError；涉及密钥/鉴权的原文不外泄
fn map_openai_error(err: impl std::fmt::Display) -> LlmError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("quota") {
        return LlmError::RateLimited {
            retry_after_ms: DEFAULT_RATE_LIMIT_BACKOFF_MS,
        };
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return LlmError::Timeout;
    }
    if lower.contains("error sending request") || lower.contains("connection") || lower.contains("dns") {
        return LlmError::Network(sanitize_api_error(&text));
    }
    if lower.contains("deserialize") || lower.contains("json") {
        return LlmError::MalformedOutput(sanitize_api_error(&text));
    }
    LlmError::Api(sanitize_api_error(&text))
}

pub(crate) fn sanitize_api_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("api key")
        || lower.contains("apikey")
        || lower.contains("invalid key")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
    {
        return "API authentication error. Please check your API key configuration.".to_string();
    }
    if error.chars().count() > 300 {
        let head: String = error.chars().take(300).collect();
        return format!("{head}...");
    }
    error.to_string()
}

/// 解析工具参数 JSON；空串视为 {}
fn parse_arguments(name: &str, raw: &str) -> Result<serde_json::Value, LlmError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| LlmError::MalformedOutput(format!("arguments of '{name}' are not valid JSON: {e}")))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        tool_choice: ToolChoice,
        options: &GenerationOptions,
    ) -> Result<AssistantReply, LlmError> {
        let (tools, tool_choice) = if tools.is_empty() {
            (None, None)
        } else {
            (
                Some(Self::to_openai_tools(tools)),
                Some(Self::to_openai_tool_choice(tool_choice)),
            )
        };
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::to_openai_messages(messages),
            tools,
            tool_choice,
            max_completion_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
            ..Default::default()
        };

        debug!(model = %self.model, messages = messages.len(), "invoke");
        let response = timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(map_openai_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedOutput("no choices in response".to_string()))?;

        let mut calls = Vec::new();
        for tc in choice.message.tool_calls.unwrap_or_default() {
            if let ChatCompletionMessageToolCalls::Function(f) = tc {
                let args = parse_arguments(&f.function.name, &f.function.arguments)?;
                calls.push(ToolCallRequest::new(f.id, f.function.name, args));
            }
        }

        Ok(AssistantReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: calls,
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<TokenStream, LlmError> {
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::to_openai_messages(messages),
            max_completion_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
            stream: Some(true),
            ..Default::default()
        };

        debug!(model = %self.model, messages = messages.len(), "stream");
        let upstream = timeout(self.request_timeout, self.client.chat().create_stream(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(map_openai_error)?;

        let idle = self.stream_timeout;
        let chunks = futures_util::stream::unfold(Some(upstream), move |upstream| async move {
            let mut upstream = upstream?;
            match timeout(idle, upstream.next()).await {
                Ok(Some(chunk)) => Some((chunk.map_err(map_openai_error), Some(upstream))),
                Ok(None) => None,
                Err(_) => Some((Err(LlmError::Timeout), None)),
            }
        });
        let tokens = chunks.filter_map(|chunk| async move {
            match chunk {
                Ok(resp) => resp
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|s| !s.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(tokens))
    }
}
