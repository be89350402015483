//! Stream, sink and callback error types.

use connectorhub_core::ConnectorError;
use thiserror::Error;

/// Errors raised while starting, running or shutting down an event stream.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Invalid stream configuration.
    #[error("config: {0}")]
    Config(String),

    /// The block feed could not be subscribed to.
    #[error("subscribe: {0}")]
    Subscribe(String),

    /// The block feed failed while delivering or releasing resources.
    #[error("feed: {0}")]
    Feed(String),

    /// Checkpoint store failure.
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] ConnectorError),

    /// The consumption task panicked or was aborted.
    #[error("stream task: {0}")]
    Task(String),
}

impl StreamError {
    /// Returns `true` for failures in the feed or checkpoint store, which
    /// never stop a running stream.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Feed(_) | Self::Checkpoint(_))
    }
}

/// Errors returned by a [`CallbackSink`](crate::sink::CallbackSink).
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The response transaction was simulated but made no committable
    /// changes, so it was not submitted.
    #[error("tx invalid: {0}")]
    TxInvalid(String),

    /// The phylum rejected the response.
    #[error("rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// Transport, endorsement or commit failure.
    #[error("delivery: {0}")]
    Delivery(String),
}

impl SinkError {
    pub fn is_tx_invalid(&self) -> bool {
        matches!(self, Self::TxInvalid(_))
    }
}

/// Errors returned by [`Event::callback`](crate::event::Event::callback).
#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// Neither or both of response and error were supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid tx: {0}")]
    TxInvalid(#[source] SinkError),

    #[error("callback: {0}")]
    Sink(#[source] SinkError),

    /// The callback message could not be encoded.
    #[error("marshal callback: {0}")]
    Encode(String),
}

impl From<SinkError> for CallbackError {
    fn from(e: SinkError) -> Self {
        if e.is_tx_invalid() {
            Self::TxInvalid(e)
        } else {
            Self::Sink(e)
        }
    }
}

impl CallbackError {
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_tx_invalid(&self) -> bool {
        matches!(self, Self::TxInvalid(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_errors_classify_on_conversion() {
        let err: CallbackError = SinkError::TxInvalid("not dirty".into()).into();
        assert!(err.is_tx_invalid());
        assert_eq!(err.to_string(), "invalid tx: tx invalid: not dirty");

        let err: CallbackError = SinkError::Delivery("endorse".into()).into();
        assert!(matches!(err, CallbackError::Sink(_)));
    }

    #[test]
    fn checkpoint_errors_are_infrastructure() {
        let err: StreamError = ConnectorError::Infrastructure("disk full".into()).into();
        assert!(err.is_infrastructure());
        assert!(!StreamError::Config("capacity".into()).is_infrastructure());
    }
}
