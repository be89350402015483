//! Event stream configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Configuration for a single [`EventStream`](crate::stream::EventStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Only process events emitted by this chaincode (empty = all).
    #[serde(default)]
    pub chaincode_id: String,
    /// Only deliver requests addressed to this MSP (empty = all).
    #[serde(default)]
    pub msp_id: String,
    /// Block to start from when no checkpoint exists.
    #[serde(default = "default_start_block")]
    pub start_block: u64,
    /// Persist the stream position here (in memory when unset).
    #[serde(default)]
    pub checkpoint_file: Option<PathBuf>,
    /// Number of resolved events buffered ahead of the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_start_block() -> u64 { 1 }
fn default_channel_capacity() -> usize { 1 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chaincode_id: String::new(),
            msp_id: String::new(),
            start_block: default_start_block(),
            checkpoint_file: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    /// Config filtering on a chaincode and MSP.
    pub fn new(chaincode_id: impl Into<String>, msp_id: impl Into<String>) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            msp_id: msp_id.into(),
            ..Self::default()
        }
    }

    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.channel_capacity == 0 {
            return Err(StreamError::Config("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`StreamConfig`].
///
/// ```
/// use connectorhub_stream::StreamConfig;
///
/// let config = StreamConfig::builder()
///     .chaincode_id("sandbox")
///     .msp_id("Org1MSP")
///     .start_block(1)
///     .checkpoint_file("/tmp/checkpoint.tmp")
///     .build();
/// assert_eq!(config.channel_capacity, 1);
/// ```
#[derive(Debug, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    pub fn chaincode_id(mut self, id: impl Into<String>) -> Self {
        self.config.chaincode_id = id.into();
        self
    }

    pub fn msp_id(mut self, id: impl Into<String>) -> Self {
        self.config.msp_id = id.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn checkpoint_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_file = Some(path.into());
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> StreamConfig {
        self.config
    }
}
