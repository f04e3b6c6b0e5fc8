//! 会话监管：同一会话线程的独占租约与取消
//!
//! 每个 thread id 同一时刻只允许一个执行持有 ConversationState；第二个并发请求直接被拒绝（ThreadBusy）。
//! 租约 drop 时自动释放；cancel(thread_id) 取消该线程当前执行的令牌。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 会话级生命周期管理：线程租约与取消令牌
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

/// 线程租约：持有期间独占该 thread id
#[derive(Debug)]
pub struct ThreadLease {
    thread_id: String,
    cancel_token: CancellationToken,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试独占 thread_id；已被占用时返回 ThreadBusy。
    /// parent 为请求方的取消令牌，租约令牌是其子令牌。
    pub fn try_acquire(
        &self,
        thread_id: &str,
        parent: &CancellationToken,
    ) -> Result<ThreadLease, AgentError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(thread_id) {
            return Err(AgentError::ThreadBusy(thread_id.to_string()));
        }
        let token = parent.child_token();
        active.insert(thread_id.to_string(), token.clone());
        Ok(ThreadLease {
            thread_id: thread_id.to_string(),
            cancel_token: token,
            active: Arc::clone(&self.active),
        })
    }

    /// 取消某线程当前执行；返回是否存在进行中的执行
    pub fn cancel(&self, thread_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(thread_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ThreadLease {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.thread_id);
    }
}
