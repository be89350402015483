//! Luther chaincode events and the connector event headers they carry.
//!
//! A Luther event is a chaincode event named [`LUTHER_EVENT_KEY`] whose
//! payload is a flat JSON `string → string` map:
//!
//! ```text
//! {
//!   "txEventName":        "...",
//!   "txRequestID":        "...",
//!   "txTimestamp":        "...",
//!   "$connector_events:0": "{\"rid\":\"...\",\"key\":\"...\",\"pdc\":\"...\"}",
//!   "$connector_events:1": "...",
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use connectorhub_core::{ConnectorError, DecodeError};
use serde::{Deserialize, Serialize};

pub const LUTHER_EVENT_KEY: &str = "luther";
pub const LUTHER_EVENT_NAME: &str = "txEventName";
pub const LUTHER_EVENT_REQUEST_ID: &str = "txRequestID";
pub const LUTHER_EVENT_TX_TIMESTAMP: &str = "txTimestamp";
pub const LUTHER_CONNECTOR_EVENT_PREFIX: &str = "$connector_events:";
pub const MAX_CONNECTOR_EVENTS_PER_TX: usize = 10;

/// Metadata describing one connector request embedded in a Luther event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorEventHeader {
    #[serde(rename = "rid", default)]
    pub request_id: String,
    #[serde(rename = "key", default)]
    pub request_key: String,
    #[serde(rename = "pdc", default, skip_serializing_if = "String::is_empty")]
    pub request_pdc: String,
    #[serde(rename = "msp", default, skip_serializing_if = "String::is_empty")]
    pub request_msp_id: String,
    #[serde(rename = "oid", default, skip_serializing_if = "String::is_empty")]
    pub object_id: String,
    #[serde(rename = "sys", default, skip_serializing_if = "String::is_empty")]
    pub request_system: String,
    #[serde(rename = "eng", default, skip_serializing_if = "String::is_empty")]
    pub request_english: String,
}

impl ConnectorEventHeader {
    /// A header can be processed once it names the key holding its body.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.request_key.is_empty() {
            return Err(ConnectorError::MissingData("missing request key".into()));
        }
        Ok(())
    }
}

impl fmt::Display for ConnectorEventHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{rid: {}}}", self.request_id)
    }
}

/// Parsed Luther event payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LutherEventPayload {
    pub name: String,
    pub request_id: String,
    pub timestamp: String,
    pub headers: Vec<ConnectorEventHeader>,
    /// More than [`MAX_CONNECTOR_EVENTS_PER_TX`] headers were declared.
    pub truncated: bool,
}

impl LutherEventPayload {
    /// Parse a Luther event payload.
    ///
    /// Fails when the payload is empty or not a flat string map. Individual
    /// headers that are not valid JSON are logged and skipped.
    pub fn parse(payload: &[u8]) -> Result<Self, ConnectorError> {
        if payload.is_empty() {
            return Err(ConnectorError::MissingData(
                "missing luther event payload".into(),
            ));
        }
        let fields: HashMap<String, String> =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Invalid {
                message: "LutherEvent",
                reason: e.to_string(),
            })?;

        let (raw_headers, truncated) =
            scan_connector_headers(&fields, MAX_CONNECTOR_EVENTS_PER_TX);

        let headers = raw_headers
            .into_iter()
            .filter_map(|(index, raw)| match serde_json::from_str(raw) {
                Ok(header) => Some(header),
                Err(e) => {
                    tracing::error!(index, error = %e, "invalid event format, ignoring");
                    None
                }
            })
            .collect();

        let field = |key: &str| fields.get(key).cloned().unwrap_or_default();
        Ok(Self {
            name: field(LUTHER_EVENT_NAME),
            request_id: field(LUTHER_EVENT_REQUEST_ID),
            timestamp: field(LUTHER_EVENT_TX_TIMESTAMP),
            headers,
            truncated,
        })
    }
}

impl fmt::Display for LutherEventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<String> = self.headers.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{}@{} [{}: [{}]]",
            self.name,
            self.timestamp,
            self.request_id,
            headers.join(", ")
        )
    }
}

/// Collect `"$connector_events:<i>"` values for `i` in `0..cap`, stopping at
/// the first missing index.
///
/// Returns each value with its index, and whether an entry at index `cap`
/// exists (the payload declared more headers than are processed).
pub fn scan_connector_headers(
    fields: &HashMap<String, String>,
    cap: usize,
) -> (Vec<(usize, &str)>, bool) {
    let mut found = Vec::new();
    for i in 0..cap {
        match fields.get(&format!("{LUTHER_CONNECTOR_EVENT_PREFIX}{i}")) {
            Some(v) => found.push((i, v.as_str())),
            None => return (found, false),
        }
    }

    let truncated = fields.contains_key(&format!("{LUTHER_CONNECTOR_EVENT_PREFIX}{cap}"));
    if truncated {
        tracing::warn!(cap, "too many connector events, truncating");
    }
    (found, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: usize) -> Vec<u8> {
        let mut m = HashMap::new();
        m.insert(LUTHER_EVENT_NAME.to_string(), "create".to_string());
        m.insert(LUTHER_EVENT_REQUEST_ID.to_string(), "r-1".to_string());
        m.insert(LUTHER_EVENT_TX_TIMESTAMP.to_string(), "2024-01-01T00:00:00Z".to_string());
        for i in 0..n {
            m.insert(
                format!("{LUTHER_CONNECTOR_EVENT_PREFIX}{i}"),
                format!(r#"{{"rid":"req-{i}","key":"k{i}"}}"#),
            );
        }
        serde_json::to_vec(&m).unwrap()
    }

    #[test]
    fn parses_headers_in_order() {
        let p = LutherEventPayload::parse(&payload(3)).unwrap();
        assert_eq!(p.name, "create");
        assert_eq!(p.request_id, "r-1");
        let ids: Vec<_> = p.headers.iter().map(|h| h.request_id.as_str()).collect();
        assert_eq!(ids, ["req-0", "req-1", "req-2"]);
        assert!(!p.truncated);
    }

    #[test]
    fn exactly_cap_is_not_truncated() {
        let p = LutherEventPayload::parse(&payload(MAX_CONNECTOR_EVENTS_PER_TX)).unwrap();
        assert_eq!(p.headers.len(), MAX_CONNECTOR_EVENTS_PER_TX);
        assert!(!p.truncated);
    }

    #[test]
    fn over_cap_is_truncated() {
        let p = LutherEventPayload::parse(&payload(MAX_CONNECTOR_EVENTS_PER_TX + 3)).unwrap();
        assert_eq!(p.headers.len(), MAX_CONNECTOR_EVENTS_PER_TX);
        assert!(p.truncated);
    }

    #[test]
    fn scan_stops_at_gap() {
        let mut m = HashMap::new();
        m.insert(format!("{LUTHER_CONNECTOR_EVENT_PREFIX}0"), "a".to_string());
        m.insert(format!("{LUTHER_CONNECTOR_EVENT_PREFIX}2"), "c".to_string());
        let (found, truncated) = scan_connector_headers(&m, 10);
        assert_eq!(found, vec![(0, "a")]);
        assert!(!truncated);
    }

    #[test]
    fn bad_header_is_skipped() {
        let mut m = HashMap::new();
        m.insert(format!("{LUTHER_CONNECTOR_EVENT_PREFIX}0"), "not json".to_string());
        m.insert(
            format!("{LUTHER_CONNECTOR_EVENT_PREFIX}1"),
            r#"{"rid":"ok","key":"k"}"#.to_string(),
        );
        let p = LutherEventPayload::parse(&serde_json::to_vec(&m).unwrap()).unwrap();
        assert_eq!(p.headers.len(), 1);
        assert_eq!(p.headers[0].request_id, "ok");
    }

    #[test]
    fn non_flat_payload_is_decode_error() {
        let err = LutherEventPayload::parse(br#"{"txEventName": 3}"#).unwrap_err();
        assert!(err.is_decode());
        let err = LutherEventPayload::parse(b"").unwrap_err();
        assert!(err.is_missing_data());
    }

    #[test]
    fn header_fields_and_validation() {
        let h: ConnectorEventHeader = serde_json::from_str(
            r#"{"rid":"r","key":"k","pdc":"private","msp":"Org1MSP","oid":"o","sys":"EQUIFAX","eng":"check credit"}"#,
        )
        .unwrap();
        assert_eq!(h.request_pdc, "private");
        assert_eq!(h.request_msp_id, "Org1MSP");
        assert_eq!(h.request_system, "EQUIFAX");
        assert!(h.validate().is_ok());

        let empty: ConnectorEventHeader = serde_json::from_str(r#"{"rid":"r"}"#).unwrap();
        assert!(empty.validate().unwrap_err().is_missing_data());
    }

    #[test]
    fn display_lists_headers() {
        let p = LutherEventPayload::parse(&payload(2)).unwrap();
        assert_eq!(
            p.to_string(),
            "create@2024-01-01T00:00:00Z [r-1: [{rid: req-0}, {rid: req-1}]]"
        );
    }
}
