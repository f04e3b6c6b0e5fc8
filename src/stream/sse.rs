//! SSE 编解码
//!
//! 每个事件编码为 `data: <json>\n\n`，流以 `data: [DONE]\n\n` 结束。
//! SseDecoder 供消费端增量解析：无法解析的帧记录日志后跳过，不会中断消费。

use crate::stream::{EventEnvelope, StreamEvent};

/// 流结束帧
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DONE_MARKER: &str = "[DONE]";

/// 以当前时间编码一个事件帧
pub fn encode_frame(event: &StreamEvent) -> String {
    encode_envelope(&EventEnvelope::now(event.clone()))
}

pub fn encode_envelope(envelope: &EventEnvelope) -> String {
    match serde_json::to_string(envelope) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize stream event");
            String::new()
        }
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event(EventEnvelope),
    Done,
}

/// 增量 SSE 解码器（按 `\n\n` 切帧，拼接帧内所有 data 行）
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一段字节文本，返回其中完整的帧
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..pos + 2).collect();
            if let Some(frame) = self.parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    /// 被跳过的坏帧数量
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse_frame(&mut self, raw: &str) -> Option<SseFrame> {
        let data: Vec<&str> = raw
            .lines()
            .filter(|l| !l.starts_with(':'))
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|l| l.strip_prefix(' ').unwrap_or(l))
            .collect();
        if data.is_empty() {
            return None;
        }
        let payload = data.join("\n");
        if payload.trim() == DONE_MARKER {
            return Some(SseFrame::Done);
        }
        match serde_json::from_str::<EventEnvelope>(&payload) {
            Ok(env) => Some(SseFrame::Event(env)),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, frame = %payload, "skipping unparseable stream frame");
                None
            }
        }
    }
}

/// 一次性解码完整的 SSE 文本
pub fn decode_all(text: &str) -> Vec<SseFrame> {
    SseDecoder::new().push(text)
}
