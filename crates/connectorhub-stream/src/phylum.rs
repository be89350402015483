//! Phylum callback sink.
//!
//! Delivers connector responses to the phylum by invoking its
//! `$ch_callback` endpoint. The response travels in the transient map; the
//! transaction is endorsed first and only submitted when the phylum reports
//! committable changes without a JSON-RPC error.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::shirorpc::{parse_response, ConnectorEventResponse, ShiroError};
use crate::sink::CallbackSink;

/// Outcome of submitting an endorsed transaction for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    pub transaction_id: String,
    pub code: i32,
    pub successful: bool,
}

/// A simulated and endorsed transaction awaiting submission.
#[async_trait]
pub trait EndorsedTransaction: Send {
    /// Chaincode response payload from simulation.
    fn result(&self) -> &[u8];

    /// Submit for ordering and wait for the commit status.
    async fn submit(self) -> Result<CommitStatus, SinkError>;
}

/// Gateway connection able to endorse chaincode transactions.
#[async_trait]
pub trait Endorser: Send + Sync {
    type Transaction: EndorsedTransaction;

    /// Simulate and endorse a transaction with the given public arguments
    /// and transient data.
    async fn endorse(
        &self,
        args: Vec<u8>,
        transient: HashMap<String, Vec<u8>>,
    ) -> Result<Self::Transaction, SinkError>;
}

/// [`CallbackSink`] that writes responses back to the phylum.
pub struct PhylumSink<E> {
    endorser: E,
}

impl<E: Endorser> PhylumSink<E> {
    pub fn new(endorser: E) -> Self {
        Self { endorser }
    }

    pub fn endorser(&self) -> &E {
        &self.endorser
    }
}

impl<E> fmt::Debug for PhylumSink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhylumSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Endorser> CallbackSink for PhylumSink<E> {
    async fn deliver(&self, request_id: &str, envelope: &[u8]) -> Result<(), SinkError> {
        let req = ConnectorEventResponse::new(envelope);
        let args = req
            .arguments_bytes()
            .map_err(|e| SinkError::Delivery(format!("callback request: {e}")))?;

        let tx = self.endorser.endorse(args, req.transient()).await?;
        let resp = match parse_response(tx.result()) {
            Ok(resp) => resp,
            Err(ShiroError::TxInvalid) => {
                return Err(SinkError::TxInvalid("response made no changes".into()))
            }
            Err(e) => return Err(SinkError::Delivery(e.to_string())),
        };
        if let Some(err) = resp.error {
            warn!(req_id = request_id, code = err.code, error = %err, "phylum rejected callback");
            return Err(SinkError::Rejected {
                code: err.code,
                message: err.to_string(),
            });
        }

        let status = tx.submit().await?;
        if !status.successful {
            return Err(SinkError::Delivery(format!("invalid status: [{}]", status.code)));
        }
        debug!(req_id = request_id, tx_id = %status.transaction_id, "callback committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shirorpc::{CSPRNG_SEED_KEY, CALLBACK_ENDPOINT};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        args: Vec<Vec<u8>>,
        transient: Vec<HashMap<String, Vec<u8>>>,
        submits: usize,
    }

    struct MockEndorser {
        reply: Vec<u8>,
        status: CommitStatus,
        log: Arc<Mutex<Recorded>>,
    }

    struct MockTx {
        reply: Vec<u8>,
        status: CommitStatus,
        log: Arc<Mutex<Recorded>>,
    }

    #[async_trait]
    impl EndorsedTransaction for MockTx {
        fn result(&self) -> &[u8] {
            &self.reply
        }

        async fn submit(self) -> Result<CommitStatus, SinkError> {
            self.log.lock().unwrap().submits += 1;
            Ok(self.status)
        }
    }

    #[async_trait]
    impl Endorser for MockEndorser {
        type Transaction = MockTx;

        async fn endorse(
            &self,
            args: Vec<u8>,
            transient: HashMap<String, Vec<u8>>,
        ) -> Result<MockTx, SinkError> {
            {
                let mut log = self.log.lock().unwrap();
                log.args.push(args);
                log.transient.push(transient);
            }
            Ok(MockTx {
                reply: self.reply.clone(),
                status: self.status.clone(),
                log: self.log.clone(),
            })
        }
    }

    fn sink(reply: &str, successful: bool) -> (PhylumSink<MockEndorser>, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let endorser = MockEndorser {
            reply: reply.as_bytes().to_vec(),
            status: CommitStatus {
                transaction_id: "tx-1".into(),
                code: if successful { 0 } else { 11 },
                successful,
            },
            log: log.clone(),
        };
        (PhylumSink::new(endorser), log)
    }

    const OK_REPLY: &str = r#"{"payload":{"jsonrpc":"2.0","id":"x","result":{}},"dirty":true}"#;

    #[tokio::test]
    async fn committed_callback() {
        let (sink, log) = sink(OK_REPLY, true);
        sink.deliver("req-1", br#"{"request_id":"req-1"}"#).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.submits, 1);
        let args: serde_json::Value = serde_json::from_slice(&log.args[0]).unwrap();
        assert_eq!(args["method"], CALLBACK_ENDPOINT);
        assert_eq!(log.transient[0]["$ch_rep:0"], br#"{"request_id":"req-1"}"#);
        assert!(log.transient[0].contains_key(CSPRNG_SEED_KEY));
    }

    #[tokio::test]
    async fn clean_simulation_is_not_submitted() {
        let (sink, log) = sink(r#"{"payload":{},"dirty":false}"#, true);
        let err = sink.deliver("req-1", b"{}").await.unwrap_err();
        assert!(err.is_tx_invalid());
        assert_eq!(log.lock().unwrap().submits, 0);
    }

    #[tokio::test]
    async fn rpc_error_is_rejected() {
        let reply = r#"{"payload":{"jsonrpc":"2.0","id":"x","error":{"code":-32603,"message":"boom","data":"detail"}},"dirty":true}"#;
        let (sink, log) = sink(reply, true);
        match sink.deliver("req-1", b"{}").await.unwrap_err() {
            SinkError::Rejected { code, message } => {
                assert_eq!(code, -32603);
                assert_eq!(message, r#"boom: "detail""#);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log.lock().unwrap().submits, 0);
    }

    #[tokio::test]
    async fn failed_commit_status() {
        let (sink, _) = sink(OK_REPLY, false);
        let err = sink.deliver("req-1", b"{}").await.unwrap_err();
        assert_eq!(err.to_string(), "delivery: invalid status: [11]");
    }
}
