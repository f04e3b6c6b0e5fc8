//! 事件发射器
//!
//! 由执行引擎驱动，保证流契约：恰好一个 Start；之后任意个 Token / ProgressUpdate；
//! 恰好一个终止事件（End 或 Error）；终止后不再发出任何事件。Token.sequence 从 1 开始连续递增。
//! 取消后什么都不再发送（包括终止事件）。接收端被丢弃视为客户端断开，会触发取消。

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::ErrorDisposition;
use crate::stream::StreamEvent;

pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<StreamEvent>>,
    cancel: CancellationToken,
    next_sequence: u64,
    started: bool,
    terminated: bool,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx: Some(tx),
            cancel,
            next_sequence: 1,
            started: false,
            terminated: false,
        }
    }

    /// 创建发射器与对应的接收端
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, cancel), rx)
    }

    /// 不连接任何客户端的发射器（子智能体内部使用），只保留契约检查与取消令牌
    pub fn detached(cancel: CancellationToken) -> Self {
        Self {
            tx: None,
            cancel,
            next_sequence: 1,
            started: false,
            terminated: false,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// 已发出的 Token 数
    pub fn tokens_emitted(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn start(&mut self, conversation_id: &str, is_new: bool, session_id: &str) -> bool {
        if self.started {
            tracing::debug!("duplicate start event ignored");
            return false;
        }
        self.started = true;
        self.send(StreamEvent::Start {
            conversation_id: conversation_id.to_string(),
            is_new,
            session_id: session_id.to_string(),
        })
    }

    pub fn token(&mut self, text: impl Into<String>) -> bool {
        if !self.open() {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.send(StreamEvent::Token {
            text: text.into(),
            sequence,
        })
    }

    pub fn progress(&mut self, message: impl Into<String>) -> bool {
        if !self.open() {
            return false;
        }
        self.send(StreamEvent::ProgressUpdate {
            message: message.into(),
        })
    }

    pub fn end(&mut self, final_text: &str, processing_time_ms: u64) -> bool {
        if !self.open() {
            return false;
        }
        self.terminated = true;
        let sent = self.send(StreamEvent::End {
            total_length: final_text.chars().count(),
            processing_time_ms,
            final_text: final_text.to_string(),
        });
        self.close();
        sent
    }

    pub fn error(&mut self, disposition: &ErrorDisposition) -> bool {
        if !self.open() {
            return false;
        }
        self.terminated = true;
        let sent = self.send(StreamEvent::Error {
            message: disposition.message.clone(),
            code: disposition.code.to_string(),
            retryable: disposition.retryable,
            retry_after_ms: disposition.retry_after_ms,
        });
        self.close();
        sent
    }

    /// 关闭通道；之后所有事件都会被丢弃
    pub fn close(&mut self) {
        self.tx = None;
    }

    fn open(&self) -> bool {
        self.started && !self.terminated && !self.cancel.is_cancelled()
    }

    fn send(&mut self, event: StreamEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };
        if tx.send(event).is_err() {
            tracing::info!("stream receiver dropped, cancelling run");
            self.cancel.cancel();
            self.tx = None;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_sequence_starts_at_one_without_gaps() {
        let (mut em, mut rx) = EventEmitter::channel(CancellationToken::new());
        em.start("conv_u_1", true, "s1");
        em.token("a");
        em.progress("working");
        em.token("b");
        em.token("c");
        em.end("abc", 5);
        let seqs: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Token { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_nothing_after_terminal_event() {
        let (mut em, mut rx) = EventEmitter::channel(CancellationToken::new());
        em.start("c", false, "s");
        em.end("done", 1);
        assert!(!em.token("late"));
        assert!(!em.error(&crate::core::RecoveryEngine::default().handle(
            &crate::core::AgentError::Graph("x".into())
        )));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_events_before_start_are_dropped() {
        let (mut em, mut rx) = EventEmitter::channel(CancellationToken::new());
        assert!(!em.token("early"));
        em.start("c", true, "s");
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_cancel_suppresses_terminal_event() {
        let token = CancellationToken::new();
        let (mut em, mut rx) = EventEmitter::channel(token.clone());
        em.start("c", true, "s");
        em.token("x");
        token.cancel();
        assert!(!em.token("y"));
        assert!(!em.end("x", 1));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(!events.iter().any(StreamEvent::is_terminal));
    }

    #[test]
    fn test_dropped_receiver_cancels() {
        let token = CancellationToken::new();
        let (mut em, rx) = EventEmitter::channel(token.clone());
        drop(rx);
        em.start("c", true, "s");
        assert!(token.is_cancelled());
    }
}
