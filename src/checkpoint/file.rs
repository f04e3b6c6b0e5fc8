//! 文件检查点存储
//!
//! 每个 thread 一个 JSON 文件；先写临时文件再 rename，保证读到的永远是完整快照。
//! 同一进程内的写入由互斥锁串行化。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{check_version, Checkpoint, CheckpointError, CheckpointStore};

#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn read(&self, path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.read(&self.path_for(thread_id)).await
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(thread_id);
        let existing = self.read(&path).await?.map(|c| c.version);
        check_version(thread_id, existing, checkpoint.version)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(thread_id, version = checkpoint.version, "checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::sample;

    #[tokio::test]
    async fn test_file_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        assert!(store.get("conv_u1_1").await.unwrap().is_none());

        let cp = sample("conv_u1_1", 1);
        store.put("conv_u1_1", &cp).await.unwrap();
        assert_eq!(store.get("conv_u1_1").await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn test_thread_id_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put("../evil/id", &sample("../evil/id", 1)).await.unwrap();
        assert!(dir.path().join("___evil_id.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.json"), "{oops").unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.get("t").await,
            Err(CheckpointError::Serde(_))
        ));
    }
}
