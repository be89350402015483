//! File-backed checkpointer.
//!
//! The cursor is stored as JSON (`{"blockNumber":N,"transactionId":""}`).
//! Each checkpoint writes a sibling temp file and renames it over the
//! target, so a crash never leaves a partially written checkpoint.
//!
//! # Usage
//! ```rust,no_run
//! use connectorhub_core::BlockCheckpointer;
//! use connectorhub_storage::FileCheckpointer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cp = FileCheckpointer::open("/tmp/checkpoint.tmp").await?;
//! let next = cp.block_number();
//! cp.checkpoint_block(next).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use connectorhub_core::{BlockCheckpointer, ConnectorError, Cursor};
use tracing::debug;

fn io_err(context: &str, path: &Path, e: std::io::Error) -> ConnectorError {
    ConnectorError::Infrastructure(format!("{context} [{}]: {e}", path.display()))
}

/// Checkpointer persisting its cursor to a JSON file.
#[derive(Debug)]
pub struct FileCheckpointer {
    path: PathBuf,
    cursor: Mutex<Cursor>,
    /// Serializes writers so renames land in checkpoint order.
    write_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl FileCheckpointer {
    /// Open the checkpoint at `path`, creating it when absent.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let path = path.as_ref().to_path_buf();

        let cursor = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Cursor::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ConnectorError::Infrastructure(format!(
                    "corrupt checkpoint file [{}]: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Cursor::default(),
            Err(e) => return Err(io_err("read checkpoint", &path, e)),
        };

        let cp = Self {
            path,
            cursor: Mutex::new(cursor.clone()),
            write_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        };
        cp.persist(&cursor).await?;
        debug!(path = %cp.path.display(), cursor = %cursor, "opened checkpoint file");
        Ok(cp)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, cursor: &Cursor) -> Result<(), ConnectorError> {
        let json = serde_json::to_vec(cursor)
            .map_err(|e| ConnectorError::Infrastructure(format!("encode checkpoint: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_err("write checkpoint", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err("rename checkpoint", &self.path, e))
    }
}

#[async_trait]
impl BlockCheckpointer for FileCheckpointer {
    fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    fn transaction_id(&self) -> String {
        self.lock().transaction_id.clone()
    }

    async fn checkpoint_block(&self, block_number: u64) -> Result<(), ConnectorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectorError::Infrastructure("checkpointer closed".into()));
        }
        let snapshot = {
            let mut cursor = self.lock();
            cursor.checkpoint_block(block_number);
            cursor.clone()
        };
        self.persist(&snapshot).await?;
        debug!(block_no = block_number, cursor = %snapshot, "checkpointed block");
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let cp = FileCheckpointer::open(&path).await.unwrap();
        assert_eq!(cp.block_number(), 0);
        assert_eq!(cp.transaction_id(), "");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let cp = FileCheckpointer::open(&path).await.unwrap();
        cp.checkpoint_block(41).await.unwrap();
        cp.close().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"blockNumber":42,"transactionId":""}"#);

        let reopened = FileCheckpointer::open(&path).await.unwrap();
        assert_eq!(reopened.block_number(), 42);
    }

    #[tokio::test]
    async fn closed_checkpointer_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpointer::open(dir.path().join("cp.json")).await.unwrap();
        cp.close().await.unwrap();
        let err = cp.checkpoint_block(1).await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn corrupt_file_is_infrastructure_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileCheckpointer::open(&path).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("corrupt checkpoint file"));
    }

    #[tokio::test]
    async fn missing_directory_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/cp.json");
        assert!(FileCheckpointer::open(&path).await.is_err());
    }
}
