//! 内存检查点存储（默认后端；子智能体内部也使用）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_version, Checkpoint, CheckpointError, CheckpointStore};

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 删除一个线程的检查点（子智能体任务结束后清理）
    pub async fn remove(&self, thread_id: &str) -> Option<Checkpoint> {
        self.entries.write().await.remove(thread_id)
    }

    /// 同步删除；锁被占用时交给后台任务（供 Drop 中使用）
    pub fn discard(self: &Arc<Self>, thread_id: &str) {
        if let Ok(mut entries) = self.entries.try_write() {
            entries.remove(thread_id);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(self);
                let thread_id = thread_id.to_string();
                handle.spawn(async move {
                    store.remove(&thread_id).await;
                });
            }
            Err(_) => tracing::warn!(thread_id, "no runtime to discard checkpoint"),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.entries.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut entries = self.entries.write().await;
        check_version(
            thread_id,
            entries.get(thread_id).map(|c| c.version),
            checkpoint.version,
        )?;
        entries.insert(thread_id.to_string(), checkpoint.clone());
        Ok(())
    }
}
