//! # connectorhub-stream
//!
//! Streams connector requests out of committed Fabric blocks and carries
//! the responses back to the phylum.
//!
//! ## Architecture
//! ```text
//! BlockFeed (ChannelFeed / FileFeed / gateway)
//!       │
//!       ▼
//! EventStream task ── BlockCheckpointer (memory / file)
//!       │
//!       ▼
//! ConnectorEventUnmarshaler
//!       │
//!       ▼
//! mpsc::Sender<Event>   ← single consumer
//!       │
//!       ▼
//! Event::callback ──► CallbackSink (LoggingSink / FnSink / PhylumSink)
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod phylum;
pub mod shirorpc;
pub mod sink;
pub mod stream;

pub use config::{StreamConfig, StreamConfigBuilder};
pub use error::{CallbackError, SinkError, StreamError};
pub use event::Event;
pub use feed::{BlockFeed, BlockStream, ChannelFeed, FileFeed};
pub use phylum::{CommitStatus, EndorsedTransaction, Endorser, PhylumSink};
pub use sink::{CallbackSink, FnSink, LoggingSink};
pub use stream::{EventStream, StreamOptions, StreamState};
