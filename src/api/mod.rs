//! HTTP API（feature `web`）
//!
//! - `POST /api/v1/agent/stream`：开始或续跑一段会话，返回 SSE 流（`data: <json>` 帧，结束帧 `data: [DONE]`）
//! - `GET /api/v1/health`：健康检查
//!
//! 客户端断开时响应流被丢弃，DropGuard 取消本次执行。取消导致的关闭不发送 `[DONE]`。

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::agent::AgentRuntime;
use crate::core::RunRequest;
use crate::stream::{EventEnvelope, StreamEvent};
use crate::tools::Toolkit;

const USER_HEADER: &str = "x-user-id";

pub struct ApiState {
    runtime: AgentRuntime,
}

/// 请求体；字段同时接受 camelCase 与 snake_case
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "conversation_id")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub toolkits: Vec<Toolkit>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<u32>,
}

impl StreamBody {
    fn into_request(self, headers: &HeaderMap) -> RunRequest {
        let user_id = self
            .user_id
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                headers
                    .get(USER_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "anonymous".to_string());
        RunRequest {
            message: self.message,
            conversation_id: self.conversation_id,
            user_id,
            toolkits: self.toolkits,
            resume: self.resume,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

pub fn router(runtime: AgentRuntime) -> Router {
    let state = Arc::new(ApiState { runtime });
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/agent/stream", post(agent_stream))
        .with_state(state)
}

/// GET /api/v1/health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// POST /api/v1/agent/stream
async fn agent_stream(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<StreamBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request = body.into_request(&headers);
    tracing::info!(
        user_id = %request.user_id,
        conversation_id = ?request.conversation_id,
        toolkits = ?request.toolkits,
        resume = request.resume,
        "agent stream requested"
    );
    let (rx, cancel) = state.runtime.stream(request);
    Sse::new(event_stream(rx, cancel.drop_guard())).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

struct Feed {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    _guard: DropGuard,
    terminal_seen: bool,
    done: bool,
}

/// 把事件通道转成 SSE 事件流；仅在见到 End/Error 后追加 `[DONE]`
fn event_stream(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    guard: DropGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let feed = Feed {
        rx,
        _guard: guard,
        terminal_seen: false,
        done: false,
    };
    stream::unfold(feed, |mut feed| async move {
        if feed.done {
            return None;
        }
        match feed.rx.recv().await {
            Some(event) => {
                feed.terminal_seen |= event.is_terminal();
                let data = serde_json::to_string(&EventEnvelope::now(event))
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "failed to serialize stream event");
                        String::from("{}")
                    });
                Some((Ok(Event::default().data(data)), feed))
            }
            None if feed.terminal_seen => {
                feed.done = true;
                Some((Ok(Event::default().data("[DONE]")), feed))
            }
            None => None,
        }
    })
}
