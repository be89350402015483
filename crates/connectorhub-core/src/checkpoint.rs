//! Block checkpointing. Persists the stream position for crash recovery.
//!
//! The stream records every block whose events were all handed to the
//! consumer. On restart it resumes from the checkpointed block instead of
//! replaying the ledger from the configured start block.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::ConnectorError;

/// Provides the current position for event processing and records the last
/// processed block.
#[async_trait]
pub trait BlockCheckpointer: Send + Sync {
    /// Block in which the next event is expected.
    fn block_number(&self) -> u64;

    /// Last successfully processed transaction within the current block.
    fn transaction_id(&self) -> String;

    /// Record a successfully processed block.
    async fn checkpoint_block(&self, block_number: u64) -> Result<(), ConnectorError>;

    /// Release resources.
    async fn close(&self) -> Result<(), ConnectorError>;

    /// Snapshot of the current position.
    fn cursor(&self) -> Cursor {
        Cursor::new(self.block_number(), self.transaction_id())
    }
}

/// In-memory checkpointer for tests and ephemeral streams.
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    cursor: Mutex<Cursor>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing position.
    pub fn at(cursor: Cursor) -> Self {
        Self {
            cursor: Mutex::new(cursor),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlockCheckpointer for MemoryCheckpointer {
    fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    fn transaction_id(&self) -> String {
        self.lock().transaction_id.clone()
    }

    async fn checkpoint_block(&self, block_number: u64) -> Result<(), ConnectorError> {
        self.lock().checkpoint_block(block_number);
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_checkpoint_advances() {
        let cp = MemoryCheckpointer::new();
        assert_eq!(cp.block_number(), 0);
        assert_eq!(cp.transaction_id(), "");

        cp.checkpoint_block(4).await.unwrap();
        assert_eq!(cp.block_number(), 5);
        assert_eq!(cp.cursor(), Cursor::new(5, ""));
        cp.close().await.unwrap();
    }

    #[tokio::test]
    async fn memory_checkpoint_from_existing() {
        let cp = MemoryCheckpointer::at(Cursor::new(100, "tx-9"));
        assert_eq!(cp.block_number(), 100);
        assert_eq!(cp.transaction_id(), "tx-9");
    }
}
