//! Error types for the connector event pipeline.

use thiserror::Error;

/// A protobuf layer could not be decoded.
///
/// Always fatal to the unit of work that produced it and never retried.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("error unmarshalling {message}: {source}")]
    Unmarshal {
        /// Target message type (e.g. `"Envelope"`).
        message: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("{message} is missing field '{field}'")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },

    #[error("invalid {message}: {reason}")]
    Invalid {
        message: &'static str,
        reason: String,
    },
}

impl DecodeError {
    pub fn unmarshal(message: &'static str, source: prost::DecodeError) -> Self {
        Self::Unmarshal { message, source }
    }

    pub fn missing(message: &'static str, field: &'static str) -> Self {
        Self::MissingField { message, field }
    }
}

/// Errors raised while building blocks, resolving connector events, and
/// running the stream.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Malformed bytes at a protobuf layer.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// Required data is absent: data hash, declared private data, or a key.
    #[error("missing data: {0}")]
    MissingData(String),

    /// A request resolved without error but carried no content.
    #[error("resolution: {0}")]
    Resolution(String),

    /// Checkpoint or sink delivery failure. Never stops the stream.
    #[error("infrastructure: {0}")]
    Infrastructure(String),

    /// The block as a whole cannot be trusted (e.g. missing chaincode id).
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Work was interrupted by a cancellation request.
    #[error("cancelled")]
    Cancelled,

    /// Context wrapper, keeps the classification of the inner error.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ConnectorError>,
    },
}

impl ConnectorError {
    /// Wrap with a context message, preserving the underlying kind.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers removed.
    pub fn root(&self) -> &ConnectorError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self.root(), Self::Decode(_))
    }

    pub fn is_missing_data(&self) -> bool {
        matches!(self.root(), Self::MissingData(_))
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self.root(), Self::Resolution(_))
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self.root(), Self::Infrastructure(_))
    }

    pub fn is_invalid_block(&self) -> bool {
        matches!(self.root(), Self::InvalidBlock(_))
    }

    /// Returns `true` for a clean shutdown signal, which is not logged as an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

/// Extension for attaching context to `Result<T, ConnectorError>`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, ConnectorError>;
}

impl<T, E: Into<ConnectorError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, ConnectorError> {
        self.map_err(|e| e.into().context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_classification() {
        let err = ConnectorError::MissingData("key not found [k]".into())
            .context("request body")
            .context("connector event");
        assert!(err.is_missing_data());
        assert!(!err.is_decode());
        assert_eq!(
            err.to_string(),
            "connector event: request body: missing data: key not found [k]"
        );
    }

    #[test]
    fn decode_error_names_message() {
        let err = DecodeError::missing("ChaincodeActionPayload", "action");
        let wrapped: ConnectorError = err.into();
        assert!(wrapped.is_decode());
        assert!(wrapped.to_string().contains("ChaincodeActionPayload"));
    }

    #[test]
    fn result_ext_wraps() {
        let res: Result<(), DecodeError> = Err(DecodeError::Invalid {
            message: "Block",
            reason: "empty".into(),
        });
        let err = res.context("new block").unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("new block: "));
    }
}
