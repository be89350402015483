//! Stream cursor: the position from which event processing resumes.

use serde::{Deserialize, Serialize};

/// The stream's current position in the ledger.
///
/// `block_number` is the block in which the next event is expected, and
/// `transaction_id` is the last processed transaction inside that block
/// (empty when the whole previous block was processed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub block_number: u64,
    #[serde(default)]
    pub transaction_id: String,
}

impl Cursor {
    pub fn new(block_number: u64, transaction_id: impl Into<String>) -> Self {
        Self {
            block_number,
            transaction_id: transaction_id.into(),
        }
    }

    /// Record that `block_number` was fully processed.
    pub fn checkpoint_block(&mut self, block_number: u64) {
        self.block_number = block_number + 1;
        self.transaction_id.clear();
    }

    /// The block to resume from, falling back to `start_block` on a fresh cursor.
    pub fn resume_from(&self, start_block: u64) -> u64 {
        if self.block_number > 0 {
            self.block_number
        } else {
            start_block
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.transaction_id.is_empty() {
            write!(f, "({})", self.block_number)
        } else {
            write!(f, "({}, {})", self.block_number, self.transaction_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_block_moves_to_next() {
        let mut cursor = Cursor::new(10, "tx-3");
        cursor.checkpoint_block(10);
        assert_eq!(cursor.block_number, 11);
        assert!(cursor.transaction_id.is_empty());
    }

    #[test]
    fn resume_from_prefers_checkpoint() {
        assert_eq!(Cursor::default().resume_from(5), 5);
        assert_eq!(Cursor::new(42, "").resume_from(5), 42);
    }

    #[test]
    fn json_shape() {
        let cursor = Cursor::new(7, "");
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(json, r#"{"blockNumber":7,"transactionId":""}"#);
        let back: Cursor = serde_json::from_str(r#"{"blockNumber":9}"#).unwrap();
        assert_eq!(back, Cursor::new(9, ""));
    }
}
