//! JSON-RPC 2.0 messages understood by shiro phyla.
//!
//! A connector response is sent to the phylum endpoint [`CALLBACK_ENDPOINT`]
//! with an empty public argument; the response itself travels in the
//! transient map under `"$ch_rep:<i>"` so it never lands on the public
//! ledger. Replies are wrapped in a `{payload, dirty}` envelope where
//! `dirty == false` means the transaction made no committable changes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

pub const CALLBACK_ENDPOINT: &str = "$ch_callback";
pub const REP_TRANSIENT_KEY_PREFIX: &str = "$ch_rep:";
pub const CSPRNG_SEED_KEY: &str = "csprng_seed_private";
pub const PHYLUM_VERSION_META: &str = "$shiro_phylum";
pub const PHYLUM_VERSION_LATEST: &str = "latest";

const SEED_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum ShiroError {
    /// Meta parameters must be `$`-prefixed.
    #[error("invalid meta param [{0}]")]
    InvalidMeta(String),

    #[error("response envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("response: {0}")]
    Response(#[source] serde_json::Error),

    #[error("encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// The transaction made no committable changes.
    #[error("tx invalid")]
    TxInvalid,
}

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    #[default]
    Null,
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request with `$`-prefixed shiro meta parameters
/// alongside the standard members.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
    #[serde(flatten)]
    pub metas: BTreeMap<String, String>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, id: RpcId, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
            metas: BTreeMap::new(),
        }
    }

    pub fn with_meta(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ShiroError> {
        let key = key.into();
        if !key.starts_with('$') {
            return Err(ShiroError::InvalidMeta(key));
        }
        self.metas.insert(key, value.into());
        Ok(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ShiroError> {
        serde_json::to_vec(self).map_err(ShiroError::Encode)
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{}: {}", self.message, data.get()),
            None => f.write_str(&self.message),
        }
    }
}

/// A JSON-RPC 2.0 response from a phylum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(rename = "$transaction_id", default)]
    pub transaction_id: String,
}

impl JsonRpcResponse {
    /// Raw JSON of the result, if any.
    pub fn result_json(&self) -> Option<&str> {
        self.result.as_deref().map(RawValue::get)
    }

    /// Unwrap the result or return the error.
    pub fn into_result(self) -> Result<Option<Box<RawValue>>, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Chaincode response envelope.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    payload: Box<RawValue>,
    #[serde(default)]
    dirty: bool,
}

/// Parse the enveloped reply of a shiro transaction.
pub fn parse_response(bytes: &[u8]) -> Result<JsonRpcResponse, ShiroError> {
    let envelope: ResponseEnvelope = serde_json::from_slice(bytes).map_err(ShiroError::Envelope)?;
    if !envelope.dirty {
        return Err(ShiroError::TxInvalid);
    }
    serde_json::from_str(envelope.payload.get()).map_err(ShiroError::Response)
}

/// Request carrying connector responses back to the phylum.
#[derive(Debug, Clone)]
pub struct ConnectorEventResponse {
    reps: Vec<Vec<u8>>,
}

impl ConnectorEventResponse {
    pub fn new(rep: impl Into<Vec<u8>>) -> Self {
        Self {
            reps: vec![rep.into()],
        }
    }

    /// Transient map: each response under `"$ch_rep:<i>"` plus a fresh
    /// random seed for the phylum's CSPRNG.
    pub fn transient(&self) -> HashMap<String, Vec<u8>> {
        let mut m: HashMap<String, Vec<u8>> = self
            .reps
            .iter()
            .enumerate()
            .map(|(i, rep)| (format!("{REP_TRANSIENT_KEY_PREFIX}{i}"), rep.clone()))
            .collect();
        let mut seed = vec![0u8; SEED_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);
        m.insert(CSPRNG_SEED_KEY.to_string(), seed);
        m
    }

    /// Public arguments: a single empty object, all data stays transient.
    pub fn arguments_bytes(&self) -> Result<Vec<u8>, ShiroError> {
        let id = RpcId::String(uuid::Uuid::new_v4().to_string());
        JsonRpcRequest::new(CALLBACK_ENDPOINT, id, vec![serde_json::json!({})])
            .with_meta(PHYLUM_VERSION_META, PHYLUM_VERSION_LATEST)?
            .to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_shape() {
        let req = ConnectorEventResponse::new(br#"{"ok":true}"#.to_vec());
        let args: Value = serde_json::from_slice(&req.arguments_bytes().unwrap()).unwrap();
        assert_eq!(args["jsonrpc"], "2.0");
        assert_eq!(args["method"], CALLBACK_ENDPOINT);
        assert_eq!(args["params"], serde_json::json!([{}]));
        assert_eq!(args[PHYLUM_VERSION_META], "latest");
        assert!(uuid::Uuid::parse_str(args["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn transient_holds_response_and_seed() {
        let req = ConnectorEventResponse::new(b"rep".to_vec());
        let t = req.transient();
        assert_eq!(t.len(), 2);
        assert_eq!(t["$ch_rep:0"], b"rep");
        assert_eq!(t[CSPRNG_SEED_KEY].len(), 32);
        assert_ne!(req.transient()[CSPRNG_SEED_KEY], t[CSPRNG_SEED_KEY]);
    }

    #[test]
    fn meta_must_be_dollar_prefixed() {
        let err = JsonRpcRequest::new("m", RpcId::Null, vec![])
            .with_meta("shiro_phylum", "latest")
            .unwrap_err();
        assert!(matches!(err, ShiroError::InvalidMeta(_)));
    }

    #[test]
    fn clean_envelope_is_tx_invalid() {
        let err = parse_response(br#"{"payload":{},"dirty":false}"#).unwrap_err();
        assert!(matches!(err, ShiroError::TxInvalid));
    }

    #[test]
    fn dirty_envelope_parses_response() {
        let resp = parse_response(
            br#"{"payload":{"jsonrpc":"2.0","id":"1","result":{"n":1},"$transaction_id":"tx-7"},"dirty":true}"#,
        )
        .unwrap();
        assert_eq!(resp.transaction_id, "tx-7");
        assert_eq!(resp.result_json(), Some(r#"{"n":1}"#));
        assert!(resp.into_result().is_ok());
    }

    #[test]
    fn rpc_error_display_includes_data() {
        let resp = parse_response(
            br#"{"payload":{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"bad","data":{"why":"x"}}},"dirty":true}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32000);
        assert_eq!(err.to_string(), r#"bad: {"why":"x"}"#);
    }

    #[test]
    fn malformed_envelope() {
        assert!(matches!(parse_response(b"nope"), Err(ShiroError::Envelope(_))));
    }
}
