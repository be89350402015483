//! Consumer-facing connector event with its response callback.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use connectorhub_core::ConnectorError;
use connectorhub_fabric::{ConnectorEvent, ConnectorEventHeader};
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CallbackError;
use crate::sink::CallbackSink;

/// Message handed to the sink for every callback.
#[derive(Serialize)]
struct CallbackMessage<'a> {
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a RawValue>,
}

/// A connector request delivered by an [`EventStream`](crate::stream::EventStream).
pub struct Event {
    inner: ConnectorEvent,
    sink: Arc<dyn CallbackSink>,
    callback_lock: Mutex<()>,
    responses: AtomicU64,
}

impl Event {
    pub fn new(inner: ConnectorEvent, sink: Arc<dyn CallbackSink>) -> Self {
        Self {
            inner,
            sink,
            callback_lock: Mutex::new(()),
            responses: AtomicU64::new(0),
        }
    }

    pub fn connector_event(&self) -> &ConnectorEvent {
        &self.inner
    }

    pub fn header(&self) -> &ConnectorEventHeader {
        self.inner.header()
    }

    pub fn request_id(&self) -> &str {
        self.inner.request_id()
    }

    pub fn request_msp_id(&self) -> &str {
        self.inner.request_msp_id()
    }

    pub fn object_id(&self) -> &str {
        self.inner.object_id()
    }

    /// Destination system name for the request.
    pub fn request_system(&self) -> &str {
        self.inner.request_system()
    }

    /// English description of the request.
    pub fn request_english(&self) -> &str {
        self.inner.request_english()
    }

    pub fn block_number(&self) -> u64 {
        self.inner.block_number()
    }

    pub fn transaction_id(&self) -> &str {
        self.inner.transaction_id()
    }

    /// The resolved request body, or the reason it could not be resolved.
    pub fn request_body(&self) -> Result<Vec<u8>, ConnectorError> {
        self.inner.request_body()
    }

    /// Number of successful callbacks so far.
    pub fn response_count(&self) -> u64 {
        self.responses.load(Ordering::Acquire)
    }

    /// Send a response for this request back to the phylum, or the error
    /// that prevented processing it. Exactly one of `resp` and `err` must be
    /// set; `resp` must be JSON.
    ///
    /// Calls on the same event are serialized.
    pub async fn callback(
        &self,
        resp: &[u8],
        err: Option<&(dyn StdError + Send + Sync)>,
    ) -> Result<(), CallbackError> {
        debug!(req_id = self.request_id(), "callback triggered");
        let _guard = self.callback_lock.lock().await;

        match (resp.is_empty(), err) {
            (true, None) => return Err(CallbackError::InvalidArgument("missing response".into())),
            (false, Some(_)) => {
                return Err(CallbackError::InvalidArgument(
                    "exactly one of resp or err required".into(),
                ))
            }
            _ => {}
        }

        let envelope = self.callback_message(resp, err)?;
        self.sink
            .deliver(self.request_id(), &envelope)
            .await
            .map_err(|e| {
                warn!(req_id = self.request_id(), error = %e, "callback delivery failed");
                CallbackError::from(e)
            })?;

        self.responses.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn callback_message(
        &self,
        resp: &[u8],
        err: Option<&(dyn StdError + Send + Sync)>,
    ) -> Result<Vec<u8>, CallbackError> {
        let response = if resp.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice::<&RawValue>(resp)
                    .map_err(|e| CallbackError::Encode(e.to_string()))?,
            )
        };
        let msg = CallbackMessage {
            request_id: self.request_id(),
            error: err.map(|e| e.to_string()),
            response,
        };
        serde_json::to_vec(&msg).map_err(|e| CallbackError::Encode(e.to_string()))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("inner", &self.inner)
            .field("responses", &self.response_count())
            .finish_non_exhaustive()
    }
}
