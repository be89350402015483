//! connectorhub-storage: checkpoint persistence backends.
//!
//! Backends:
//! - [`MemoryCheckpointer`]: in-memory (re-exported from core, no persistence)
//! - [`file`]: single JSON file, rewritten atomically on every checkpoint

pub mod file;

pub use connectorhub_core::MemoryCheckpointer;
pub use file::FileCheckpointer;
