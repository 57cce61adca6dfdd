//! TaskStore - persisted task lists
//!
//! ## Responsibilities
//!
//! - One JSON file per orchestrator holding the full task array
//! - Rewritten in full on every mutation (no append log)
//! - Writes serialized so concurrent start/stop cannot lose updates
//! - Unreadable records are skipped on load, never fatal

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Whether a task currently holds a live camera session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Hooked and receiving frames
    Running,
    /// Waiting to (re)hook the camera
    Waiting,
}

/// Stable task id for a kind and identifying parts
///
/// Name-based UUID, so the same task gets the same id across restarts.
pub fn derive_task_id(kind: &str, parts: &[&str]) -> String {
    let name = format!("{}:{}", kind, parts.join(":"));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// JSON array file of task records
pub struct TaskStore<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TaskStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every valid record; a missing file is an empty list
    pub async fn load(&self) -> Result<Vec<T>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
        let mut records = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        index = index,
                        error = %e,
                        "Skipping unreadable task record"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Replace the file with `records`
    pub async fn save(&self, records: &[T]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(records).await
    }

    /// Take the snapshot and write it under the write lock
    ///
    /// Concurrent callers each persist a snapshot taken after the previous
    /// write finished, so the last writer always sees the latest state.
    pub async fn save_with<F, Fut>(&self, snapshot: F) -> Result<usize>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<T>>,
    {
        let _guard = self.write_lock.lock().await;
        let records = snapshot().await;
        self.write(&records).await?;
        Ok(records.len())
    }

    async fn write(&self, records: &[T]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, json).await?;

        tracing::debug!(path = %self.path.display(), count = records.len(), "Task list saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
        width: u32,
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("camhub-store-{}", Uuid::new_v4()))
            .join("tasks.json")
    }

    #[test]
    fn test_derive_task_id_is_stable() {
        let a = derive_task_id("record", &["/dev/video0", "alice", "640x480"]);
        let b = derive_task_id("record", &["/dev/video0", "alice", "640x480"]);
        let c = derive_task_id("record", &["/dev/video0", "alice", "320x240"]);
        let d = derive_task_id("motion", &["/dev/video0", "alice", "640x480"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let store: TaskStore<Record> = TaskStore::new(temp_path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = TaskStore::new(temp_path());
        let records = vec![
            Record { id: "a".into(), width: 640 },
            Record { id: "b".into(), width: 1280 },
        ];
        store.save(&records).await.unwrap();
        assert_eq!(store.load().await.unwrap(), records);

        store.save(&records[..1]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), records[..1].to_vec());
    }

    #[tokio::test]
    async fn test_save_with_snapshot() {
        let store = TaskStore::new(temp_path());
        let count = store
            .save_with(|| async { vec![Record { id: "x".into(), width: 1 }] })
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.load().await.unwrap()[0].id, "x");
    }

    #[tokio::test]
    async fn test_bad_record_skipped() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, r#"[{"id":"a","width":640},{"id":"b"},{"id":"c","width":320}]"#)
            .await
            .unwrap();

        let store: TaskStore<Record> = TaskStore::new(&path);
        let ids: Vec<String> = store.load().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_not_an_array_is_error() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, "{").await.unwrap();

        let store: TaskStore<Record> = TaskStore::new(&path);
        assert!(store.load().await.is_err());
    }
}
