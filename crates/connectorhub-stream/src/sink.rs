//! `CallbackSink` trait, where connector responses go once a consumer has
//! processed an event.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SinkError;

/// Destination for callback envelopes.
///
/// `envelope` is the encoded `{"request_id", "error"?, "response"?}`
/// message produced by [`Event::callback`](crate::event::Event::callback).
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn deliver(&self, request_id: &str, envelope: &[u8]) -> Result<(), SinkError>;
}

/// Sink used when nothing else is registered: logs the response and drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl CallbackSink for LoggingSink {
    async fn deliver(&self, request_id: &str, envelope: &[u8]) -> Result<(), SinkError> {
        debug!(
            req_id = request_id,
            response = %String::from_utf8_lossy(envelope),
            "no callback sink registered, ignoring response"
        );
        Ok(())
    }
}

/// Adapts a synchronous closure into a [`CallbackSink`].
///
/// ```
/// use connectorhub_stream::{CallbackSink, FnSink};
///
/// let sink = FnSink::new(|req_id: &str, _envelope: &[u8]| {
///     println!("callback for {req_id}");
///     Ok(())
/// });
/// # let _: &dyn CallbackSink = &sink;
/// ```
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&str, &[u8]) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> CallbackSink for FnSink<F>
where
    F: Fn(&str, &[u8]) -> Result<(), SinkError> + Send + Sync,
{
    async fn deliver(&self, request_id: &str, envelope: &[u8]) -> Result<(), SinkError> {
        (self.f)(request_id, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn fn_sink_forwards_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink = FnSink::new(move |id: &str, env: &[u8]| {
            seen2.lock().unwrap().push((id.to_string(), env.to_vec()));
            Ok(())
        });

        sink.deliver("req-1", b"{}").await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("req-1".to_string(), b"{}".to_vec())]);
    }

    #[tokio::test]
    async fn fn_sink_propagates_errors() {
        let sink = FnSink::new(|_: &str, _: &[u8]| Err(SinkError::TxInvalid("clean".into())));
        assert!(sink.deliver("r", b"").await.unwrap_err().is_tx_invalid());
    }

    #[tokio::test]
    async fn logging_sink_accepts_everything() {
        assert!(LoggingSink.deliver("r", b"not json").await.is_ok());
    }
}
