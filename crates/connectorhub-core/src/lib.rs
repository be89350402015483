//! connectorhub-core: shared foundation for the connector event pipeline.
//!
//! # Architecture
//!
//! ```text
//! BlockFeed → EventStream task
//!                 ├── Block / Transaction model   (connectorhub-fabric)
//!                 ├── ConnectorEventUnmarshaler   (connectorhub-fabric)
//!                 ├── BlockCheckpointer           (memory / file)
//!                 └── Event → CallbackSink        (connectorhub-stream)
//! ```

pub mod checkpoint;
pub mod cursor;
pub mod error;

pub use checkpoint::{BlockCheckpointer, MemoryCheckpointer};
pub use cursor::Cursor;
pub use error::{ConnectorError, DecodeError, ResultExt};
