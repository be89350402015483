//! Immutable semantic model of a committed block.

use std::fmt;

use connectorhub_core::{ConnectorError, DecodeError, ResultExt};
use prost::Message;

use crate::luther::{LutherEventPayload, LUTHER_EVENT_KEY};
use crate::proto::{self, ChaincodeAction, ChaincodeEvent, TxValidationCode};
use crate::rwset::{get_ns_rw_sets, NsRwSet};
use crate::unmarshal::{
    chaincode_action_payloads, unmarshal_chaincode_event, unmarshal_channel_header,
    unmarshal_envelope, unmarshal_payload, unmarshal_transaction, transactions_filter,
};

/// Placeholder for an absent transaction id.
pub const NO_TX_ID: &str = "n/a";

/// Validation code of a transaction as recorded by the committing peer.
///
/// Negative values mean the code is unknown (no filter metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxValidation(pub i32);

impl TxValidation {
    pub const UNKNOWN: TxValidation = TxValidation(-1);

    /// Fabric name of the validation code, `"n/a"` when unknown.
    pub fn reason(&self) -> String {
        if self.0 < 0 {
            return NO_TX_ID.to_string();
        }
        match TxValidationCode::try_from(self.0) {
            Ok(code) => code.as_str_name().to_string(),
            Err(_) => format!("invalid code [{}]", self.0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0 == TxValidationCode::Valid as i32
    }
}

/// A chaincode event emitted by a transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    inner: ChaincodeEvent,
}

impl Event {
    pub fn chaincode_id(&self) -> &str {
        &self.inner.chaincode_id
    }

    pub fn tx_id(&self) -> &str {
        &self.inner.tx_id
    }

    pub fn name(&self) -> &str {
        &self.inner.event_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    pub fn is_luther_event(&self) -> bool {
        self.inner.event_name == LUTHER_EVENT_KEY
    }

    /// Parse the payload of a Luther event.
    pub fn to_luther_event(&self) -> Result<LutherEventPayload, ConnectorError> {
        if !self.is_luther_event() {
            return Err(DecodeError::Invalid {
                message: "LutherEvent",
                reason: format!("non-luther event [{}]", self.name()),
            }
            .into());
        }
        LutherEventPayload::parse(self.payload())
    }
}

impl From<ChaincodeEvent> for Event {
    fn from(inner: ChaincodeEvent) -> Self {
        Self { inner }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_luther_event() {
            return f.write_str("<none>");
        }
        match self.to_luther_event() {
            Ok(payload) => write!(f, "{payload}"),
            Err(_) => f.write_str("<corrupt>"),
        }
    }
}

/// The event and state changes of a single transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionDetails {
    event: Option<Event>,
    ns_rw_sets: Vec<NsRwSet>,
}

impl TransactionDetails {
    /// Decode the transaction payload data into details.
    ///
    /// A transaction with no endorsed action yields empty details.
    pub fn new(tx_bytes: &[u8]) -> Result<Self, ConnectorError> {
        let Some(action) = chaincode_action(tx_bytes).context("get action")? else {
            return Ok(Self::default());
        };

        let event = if action.events.is_empty() {
            None
        } else {
            Some(Event::from(
                unmarshal_chaincode_event(&action.events).context("get event")?,
            ))
        };
        let ns_rw_sets = get_ns_rw_sets(&action.results).context("get ns rw sets")?;

        Ok(Self { event, ns_rw_sets })
    }

    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    pub fn ns_rw_sets(&self) -> &[NsRwSet] {
        &self.ns_rw_sets
    }

    /// Total size of read keys.
    pub fn read_set_size(&self) -> usize {
        self.ns_rw_sets
            .iter()
            .flat_map(|ns| &ns.rw_set.read_set)
            .map(|r| r.key.len())
            .sum()
    }

    /// Total size of written keys and values.
    pub fn write_set_size(&self) -> usize {
        self.ns_rw_sets
            .iter()
            .flat_map(|ns| &ns.rw_set.write_set)
            .map(|w| w.key.len() + w.value.len())
            .sum()
    }

    /// Value written for `key` in namespace `ns`.
    pub fn write_set_value(&self, ns: &str, key: &str) -> Result<Vec<u8>, ConnectorError> {
        if ns.is_empty() {
            return Err(ConnectorError::MissingData("missing namespace".into()));
        }
        if key.is_empty() {
            return Err(ConnectorError::MissingData("missing key".into()));
        }
        self.ns_rw_sets
            .iter()
            .filter(|set| set.namespace == ns)
            .find_map(|set| set.rw_set.value(key))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ConnectorError::MissingData(format!("key not found [{key}]")))
    }
}

/// First action of an endorser transaction, or `None` at any empty layer.
fn chaincode_action(tx_bytes: &[u8]) -> Result<Option<ChaincodeAction>, DecodeError> {
    if tx_bytes.is_empty() {
        return Ok(None);
    }
    let tx = unmarshal_transaction(tx_bytes)?;
    let Some(action) = tx.actions.first() else {
        return Ok(None);
    };
    if action.payload.is_empty() {
        return Ok(None);
    }

    match chaincode_action_payloads(action) {
        Ok((_, cc_action)) => Ok(Some(cc_action)),
        Err(DecodeError::MissingField { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// A decoded transaction envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: String,
    number: usize,
    size: usize,
    details: TransactionDetails,
}

impl Transaction {
    /// Decode the `number`-th envelope of a block.
    pub fn new(number: usize, envelope_bytes: &[u8]) -> Result<Self, ConnectorError> {
        if envelope_bytes.is_empty() {
            return Err(DecodeError::Invalid {
                message: "Envelope",
                reason: "empty envelope".into(),
            }
            .into());
        }
        let envelope = unmarshal_envelope(envelope_bytes).context("get payload")?;
        let payload = unmarshal_payload(&envelope.payload).context("get payload")?;

        let channel_header = payload
            .header
            .as_ref()
            .map(|h| h.channel_header.as_slice())
            .unwrap_or_default();
        let id = unmarshal_channel_header(channel_header)
            .context("get transaction id")?
            .tx_id;

        let details = TransactionDetails::new(&payload.data).context("transaction details")?;

        Ok(Self {
            id,
            number,
            size: envelope_bytes.len(),
            details,
        })
    }

    /// Transaction id, `"n/a"` when the channel header carries none.
    pub fn id(&self) -> &str {
        if self.id.is_empty() {
            NO_TX_ID
        } else {
            &self.id
        }
    }

    /// Index of the transaction within its block.
    pub fn number(&self) -> usize {
        self.number
    }

    /// Byte length of the raw envelope.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn details(&self) -> &TransactionDetails {
        &self.details
    }

    pub fn event(&self) -> Option<&Event> {
        self.details.event()
    }
}

/// A committed block with decoded transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    hash: String,
    block_num: u64,
    size: usize,
    transactions: Vec<Transaction>,
    validations: Vec<TxValidation>,
}

impl Block {
    /// Decode every transaction of `raw`.
    ///
    /// Validation codes are only attached when the transactions filter has
    /// exactly one entry per transaction.
    pub fn new(raw: &proto::Block) -> Result<Self, ConnectorError> {
        let header = raw
            .header
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidBlock("nil header".into()))?;
        if header.data_hash.is_empty() {
            return Err(ConnectorError::InvalidBlock("no data hash".into()));
        }

        let data: &[Vec<u8>] = raw.data.as_ref().map(|d| d.data.as_slice()).unwrap_or_default();
        let filter = transactions_filter(raw);

        let validations = if filter.len() == data.len() {
            filter.iter().map(|&code| TxValidation(i32::from(code))).collect()
        } else {
            Vec::new()
        };

        let transactions = data
            .iter()
            .enumerate()
            .map(|(i, envelope)| Transaction::new(i, envelope).context(format!("new tx [{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            hash: hex::encode(&header.data_hash),
            block_num: header.number,
            size: raw.encoded_len(),
            transactions,
            validations,
        })
    }

    /// Hex-encoded data hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    /// Encoded size of the raw block.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Validation of the `tx_num`-th transaction, [`TxValidation::UNKNOWN`]
    /// when out of range or absent.
    pub fn validation(&self, tx_num: usize) -> TxValidation {
        self.validations
            .get(tx_num)
            .copied()
            .unwrap_or(TxValidation::UNKNOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, TxBuilder};

    #[test]
    fn builds_block_with_validations() {
        let raw = BlockBuilder::new(7)
            .tx(TxBuilder::new("tx-a").chaincode("cc").write("cc", "k", b"v"))
            .tx(
                TxBuilder::new("tx-b")
                    .chaincode("cc")
                    .validation(TxValidationCode::MvccReadConflict),
            )
            .build_block();
        let block = Block::new(&raw).unwrap();

        assert_eq!(block.block_num(), 7);
        assert_eq!(block.transactions().len(), 2);
        assert_eq!(block.transactions()[1].id(), "tx-b");
        assert_eq!(block.transactions()[1].number(), 1);
        assert!(block.validation(0).is_valid());
        assert_eq!(block.validation(1).reason(), "MVCC_READ_CONFLICT");
        assert!(!block.validation(1).is_valid());
        assert_eq!(block.validation(2), TxValidation::UNKNOWN);
        assert_eq!(block.hash(), hex::encode(&raw.header.as_ref().unwrap().data_hash));
        assert_eq!(block.size(), raw.encoded_len());
    }

    #[test]
    fn new_block_is_idempotent() {
        let header = crate::luther::ConnectorEventHeader {
            request_id: "req-1".into(),
            request_key: "k1".into(),
            ..Default::default()
        };
        let raw = BlockBuilder::new(12)
            .tx(
                TxBuilder::new("tx-a")
                    .chaincode("cc")
                    .read("cc", "k0", 3, 0)
                    .write("cc", "k1", br#"{"a":1}"#)
                    .luther_event("req-1", &[header]),
            )
            .tx(
                TxBuilder::new("tx-b")
                    .chaincode("cc")
                    .write("cc", "k2", b"v2")
                    .write("other", "k3", b"v3")
                    .validation(TxValidationCode::MvccReadConflict),
            )
            .tx(TxBuilder::new("tx-c").chaincode("cc").event("plain", b"x".to_vec()))
            .build_block();

        let first = Block::new(&raw).unwrap();
        let second = Block::new(&raw).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.transactions().len(), 3);
        assert!(first.transactions()[0].event().unwrap().is_luther_event());
        assert_eq!(first.validation(1).reason(), "MVCC_READ_CONFLICT");
    }

    #[test]
    fn mismatched_filter_leaves_validations_unknown() {
        let mut raw = BlockBuilder::new(1)
            .tx(TxBuilder::new("tx-a").chaincode("cc"))
            .build_block();
        raw.metadata.as_mut().unwrap().metadata[2] = vec![0, 0];
        let block = Block::new(&raw).unwrap();
        assert_eq!(block.validation(0).reason(), "n/a");
        assert!(!block.validation(0).is_valid());
    }

    #[test]
    fn missing_data_hash_is_invalid_block() {
        let mut raw = BlockBuilder::new(1).build_block();
        raw.header.as_mut().unwrap().data_hash.clear();
        let err = Block::new(&raw).unwrap_err();
        assert!(err.is_invalid_block());
        assert!(err.to_string().contains("no data hash"));
    }

    #[test]
    fn corrupt_transaction_names_index() {
        let mut raw = BlockBuilder::new(1)
            .tx(TxBuilder::new("tx-a").chaincode("cc"))
            .build_block();
        raw.data.as_mut().unwrap().data.push(vec![0xff, 0xff]);
        raw.metadata.as_mut().unwrap().metadata[2].push(0);
        let err = Block::new(&raw).unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("new tx [1]"));
    }

    #[test]
    fn unknown_validation_code() {
        assert_eq!(TxValidation(99).reason(), "invalid code [99]");
        assert_eq!(TxValidation(254).reason(), "NOT_VALIDATED");
    }

    #[test]
    fn write_set_lookup() {
        let raw = BlockBuilder::new(1)
            .tx(
                TxBuilder::new("tx-a")
                    .chaincode("cc")
                    .write("cc", "k1", b"v1")
                    .write("other", "k2", b"v2"),
            )
            .build_block();
        let block = Block::new(&raw).unwrap();
        let details = block.transactions()[0].details();

        assert_eq!(details.write_set_value("cc", "k1").unwrap(), b"v1");
        assert!(details.write_set_value("cc", "k2").unwrap_err().is_missing_data());
        assert_eq!(
            details.write_set_value("", "k1").unwrap_err().to_string(),
            "missing data: missing namespace"
        );
        assert_eq!(
            details.write_set_value("cc", "").unwrap_err().to_string(),
            "missing data: missing key"
        );
        assert_eq!(details.write_set_size(), 8);
    }

    #[test]
    fn missing_tx_id_placeholder() {
        let raw = BlockBuilder::new(1).tx(TxBuilder::new("")).build_block();
        let block = Block::new(&raw).unwrap();
        assert_eq!(block.transactions()[0].id(), "n/a");
        assert!(block.transactions()[0].event().is_none());
    }

    #[test]
    fn event_display() {
        let none = Event::from(ChaincodeEvent {
            event_name: "other".into(),
            ..Default::default()
        });
        assert_eq!(none.to_string(), "<none>");

        let corrupt = Event::from(ChaincodeEvent {
            event_name: LUTHER_EVENT_KEY.into(),
            payload: b"[1,2]".to_vec(),
            ..Default::default()
        });
        assert_eq!(corrupt.to_string(), "<corrupt>");
    }
}
