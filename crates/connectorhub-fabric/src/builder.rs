//! Builders for synthetic blocks.
//!
//! Produces the same nested protobuf layers a peer delivers, so tests and
//! local tooling can exercise the decoder without a network.
//!
//! ```
//! use connectorhub_fabric::builder::{BlockBuilder, TxBuilder};
//!
//! let block = BlockBuilder::new(5)
//!     .tx(TxBuilder::new("tx-1").chaincode("cc").write("cc", "key", b"value"))
//!     .build();
//! assert_eq!(block.block.unwrap().data.unwrap().data.len(), 1);
//! ```

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use sha2::{Digest, Sha256};

use crate::luther::{
    ConnectorEventHeader, LUTHER_CONNECTOR_EVENT_PREFIX, LUTHER_EVENT_KEY, LUTHER_EVENT_NAME,
    LUTHER_EVENT_REQUEST_ID, LUTHER_EVENT_TX_TIMESTAMP,
};
use crate::proto::{
    Block, BlockAndPrivateData, BlockData, BlockHeader, BlockMetadata, BlockMetadataIndex,
    ChaincodeAction, ChaincodeActionPayload, ChaincodeEndorsedAction, ChaincodeEvent,
    ChaincodeId, ChannelHeader, CollectionHashedReadWriteSet, CollectionPvtReadWriteSet,
    Envelope, HashedRwSet, Header, HeaderType, KvRead, KvRwSet, KvWrite, KvWriteHash,
    NsPvtReadWriteSet, NsReadWriteSet, Payload, ProposalResponsePayload, Response,
    SerializedIdentity, SignatureHeader, Timestamp, Transaction, TransactionAction,
    TxPvtReadWriteSet, TxReadWriteSet, TxValidationCode, Version,
};

const DEFAULT_CHANNEL: &str = "luther";
const DEFAULT_MSP: &str = "Org1MSP";
const METADATA_ENTRIES: usize = 5;

fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn now() -> Timestamp {
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp {
        seconds: since.as_secs() as i64,
        nanos: since.subsec_nanos() as i32,
    }
}

/// Encoded `KVRWSet` holding only writes.
pub fn kv_rw_set(writes: &[(&str, &[u8])]) -> Vec<u8> {
    KvRwSet {
        reads: Vec::new(),
        writes: writes
            .iter()
            .map(|(key, value)| KvWrite {
                key: key.to_string(),
                is_delete: false,
                value: value.to_vec(),
            })
            .collect(),
    }
    .encode_to_vec()
}

/// Private data for a single collection of a single namespace.
pub fn pvt_data(ns: &str, collection: &str, writes: &[(&str, &[u8])]) -> TxPvtReadWriteSet {
    TxPvtReadWriteSet {
        data_model: 0,
        ns_pvt_rwset: vec![NsPvtReadWriteSet {
            namespace: ns.to_string(),
            collection_pvt_rwset: vec![CollectionPvtReadWriteSet {
                collection_name: collection.to_string(),
                rwset: kv_rw_set(writes),
            }],
        }],
    }
}

/// Luther event payload declaring `headers` in order.
pub fn luther_payload(name: &str, request_id: &str, headers: &[ConnectorEventHeader]) -> Vec<u8> {
    let mut fields: HashMap<String, String> = HashMap::new();
    fields.insert(LUTHER_EVENT_NAME.into(), name.into());
    fields.insert(LUTHER_EVENT_REQUEST_ID.into(), request_id.into());
    fields.insert(
        LUTHER_EVENT_TX_TIMESTAMP.into(),
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    );
    for (i, header) in headers.iter().enumerate() {
        let raw = serde_json::to_string(header).unwrap_or_default();
        fields.insert(format!("{LUTHER_CONNECTOR_EVENT_PREFIX}{i}"), raw);
    }
    serde_json::to_vec(&fields).unwrap_or_default()
}

/// Builds one endorser transaction envelope.
#[derive(Debug, Clone)]
pub struct TxBuilder {
    tx_id: String,
    channel: String,
    chaincode: String,
    event: Option<(String, Vec<u8>)>,
    reads: Vec<(String, String, Version)>,
    writes: Vec<(String, String, Vec<u8>)>,
    private_writes: Vec<(String, String, String, Vec<u8>)>,
    validation: TxValidationCode,
}

impl TxBuilder {
    pub fn new(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            channel: DEFAULT_CHANNEL.to_string(),
            chaincode: String::new(),
            event: None,
            reads: Vec::new(),
            writes: Vec::new(),
            private_writes: Vec::new(),
            validation: TxValidationCode::Valid,
        }
    }

    /// Chaincode that endorsed the transaction and emitted its event.
    pub fn chaincode(mut self, ccid: impl Into<String>) -> Self {
        self.chaincode = ccid.into();
        self
    }

    pub fn event(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.event = Some((name.into(), payload.into()));
        self
    }

    /// Emit a Luther event declaring `headers`.
    pub fn luther_event(self, request_id: &str, headers: &[ConnectorEventHeader]) -> Self {
        let payload = luther_payload("connector", request_id, headers);
        self.event(LUTHER_EVENT_KEY, payload)
    }

    pub fn read(mut self, ns: &str, key: &str, block_num: u64, tx_num: u64) -> Self {
        self.reads
            .push((ns.to_string(), key.to_string(), Version { block_num, tx_num }));
        self
    }

    pub fn write(mut self, ns: &str, key: &str, value: &[u8]) -> Self {
        self.writes
            .push((ns.to_string(), key.to_string(), value.to_vec()));
        self
    }

    /// Write into a private data collection. The public block carries only
    /// the hashed write set.
    pub fn private_write(mut self, ns: &str, collection: &str, key: &str, value: &[u8]) -> Self {
        self.private_writes.push((
            ns.to_string(),
            collection.to_string(),
            key.to_string(),
            value.to_vec(),
        ));
        self
    }

    pub fn validation(mut self, code: TxValidationCode) -> Self {
        self.validation = code;
        self
    }

    fn namespaces(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let all = self
            .reads
            .iter()
            .map(|r| r.0.as_str())
            .chain(self.writes.iter().map(|w| w.0.as_str()))
            .chain(self.private_writes.iter().map(|w| w.0.as_str()));
        for ns in all {
            if !out.contains(&ns) {
                out.push(ns);
            }
        }
        out
    }

    fn collections(&self, ns: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (_, collection, _, _) in self.private_writes.iter().filter(|w| w.0 == ns) {
            if !out.contains(&collection.as_str()) {
                out.push(collection);
            }
        }
        out
    }

    fn collection_rw_set(&self, ns: &str, collection: &str) -> KvRwSet {
        KvRwSet {
            reads: Vec::new(),
            writes: self
                .private_writes
                .iter()
                .filter(|w| w.0 == ns && w.1 == collection)
                .map(|(_, _, key, value)| KvWrite {
                    key: key.clone(),
                    is_delete: false,
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn results(&self) -> Vec<u8> {
        let ns_rwset = self
            .namespaces()
            .into_iter()
            .map(|ns| {
                let kv = KvRwSet {
                    reads: self
                        .reads
                        .iter()
                        .filter(|r| r.0 == ns)
                        .map(|(_, key, version)| KvRead {
                            key: key.clone(),
                            version: Some(version.clone()),
                        })
                        .collect(),
                    writes: self
                        .writes
                        .iter()
                        .filter(|w| w.0 == ns)
                        .map(|(_, key, value)| KvWrite {
                            key: key.clone(),
                            is_delete: false,
                            value: value.clone(),
                        })
                        .collect(),
                };
                let collection_hashed_rwset = self
                    .collections(ns)
                    .into_iter()
                    .map(|collection| {
                        let pvt = self.collection_rw_set(ns, collection);
                        let hashed = HashedRwSet {
                            hashed_reads: Vec::new(),
                            hashed_writes: pvt
                                .writes
                                .iter()
                                .map(|w| KvWriteHash {
                                    key_hash: sha256(w.key.as_bytes()),
                                    is_delete: false,
                                    value_hash: sha256(&w.value),
                                    is_purge: false,
                                })
                                .collect(),
                        };
                        CollectionHashedReadWriteSet {
                            collection_name: collection.to_string(),
                            hashed_rwset: hashed.encode_to_vec(),
                            pvt_rwset_hash: sha256(&pvt.encode_to_vec()),
                        }
                    })
                    .collect();
                NsReadWriteSet {
                    namespace: ns.to_string(),
                    rwset: kv.encode_to_vec(),
                    collection_hashed_rwset,
                }
            })
            .collect();

        TxReadWriteSet {
            data_model: 0,
            ns_rwset,
        }
        .encode_to_vec()
    }

    fn is_empty(&self) -> bool {
        self.chaincode.is_empty()
            && self.event.is_none()
            && self.reads.is_empty()
            && self.writes.is_empty()
            && self.private_writes.is_empty()
    }

    fn transaction_data(&self, signature_header: &[u8]) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }
        let events = self
            .event
            .as_ref()
            .map(|(name, payload)| {
                ChaincodeEvent {
                    chaincode_id: self.chaincode.clone(),
                    tx_id: self.tx_id.clone(),
                    event_name: name.clone(),
                    payload: payload.clone(),
                }
                .encode_to_vec()
            })
            .unwrap_or_default();

        let action = ChaincodeAction {
            results: self.results(),
            events,
            response: Some(Response {
                status: 200,
                message: String::new(),
                payload: Vec::new(),
            }),
            chaincode_id: Some(ChaincodeId {
                path: String::new(),
                name: self.chaincode.clone(),
                version: "1".into(),
            }),
        };
        let prp = ProposalResponsePayload {
            proposal_hash: sha256(self.tx_id.as_bytes()),
            extension: action.encode_to_vec(),
        };
        let cap = ChaincodeActionPayload {
            chaincode_proposal_payload: Vec::new(),
            action: Some(ChaincodeEndorsedAction {
                proposal_response_payload: prp.encode_to_vec(),
                endorsements: Vec::new(),
            }),
        };
        Transaction {
            actions: vec![TransactionAction {
                header: signature_header.to_vec(),
                payload: cap.encode_to_vec(),
            }],
        }
        .encode_to_vec()
    }

    /// Encoded `Envelope` for this transaction.
    pub fn build_envelope(&self) -> Vec<u8> {
        let channel_header = ChannelHeader {
            r#type: HeaderType::EndorserTransaction as i32,
            version: 0,
            timestamp: Some(now()),
            channel_id: self.channel.clone(),
            tx_id: self.tx_id.clone(),
            epoch: 0,
            extension: Vec::new(),
            tls_cert_hash: Vec::new(),
        };
        let signature_header = SignatureHeader {
            creator: SerializedIdentity {
                mspid: DEFAULT_MSP.into(),
                id_bytes: Vec::new(),
            }
            .encode_to_vec(),
            nonce: sha256(self.tx_id.as_bytes())[..24].to_vec(),
        }
        .encode_to_vec();

        let payload = Payload {
            header: Some(Header {
                channel_header: channel_header.encode_to_vec(),
                signature_header: signature_header.clone(),
            }),
            data: self.transaction_data(&signature_header),
        };
        Envelope {
            payload: payload.encode_to_vec(),
            signature: Vec::new(),
        }
        .encode_to_vec()
    }

    /// Private data of this transaction, if it wrote to any collection.
    pub fn private_data(&self) -> Option<TxPvtReadWriteSet> {
        if self.private_writes.is_empty() {
            return None;
        }
        let mut namespaces: Vec<&str> = Vec::new();
        for (ns, ..) in &self.private_writes {
            if !namespaces.contains(&ns.as_str()) {
                namespaces.push(ns);
            }
        }
        Some(TxPvtReadWriteSet {
            data_model: 0,
            ns_pvt_rwset: namespaces
                .into_iter()
                .map(|ns| NsPvtReadWriteSet {
                    namespace: ns.to_string(),
                    collection_pvt_rwset: self
                        .collections(ns)
                        .into_iter()
                        .map(|collection| CollectionPvtReadWriteSet {
                            collection_name: collection.to_string(),
                            rwset: self.collection_rw_set(ns, collection).encode_to_vec(),
                        })
                        .collect(),
                })
                .collect(),
        })
    }
}

/// Builds a block and its private data from transaction builders.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    number: u64,
    previous_hash: Vec<u8>,
    channel: String,
    txs: Vec<TxBuilder>,
}

impl BlockBuilder {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            previous_hash: Vec::new(),
            channel: DEFAULT_CHANNEL.to_string(),
            txs: Vec::new(),
        }
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn previous_hash(mut self, hash: impl Into<Vec<u8>>) -> Self {
        self.previous_hash = hash.into();
        self
    }

    pub fn tx(mut self, tx: TxBuilder) -> Self {
        self.txs.push(tx);
        self
    }

    /// The raw block, with a transactions filter entry per transaction.
    pub fn build_block(&self) -> Block {
        let data: Vec<Vec<u8>> = self
            .txs
            .iter()
            .map(|tx| {
                let mut tx = tx.clone();
                tx.channel = self.channel.clone();
                tx.build_envelope()
            })
            .collect();

        let mut metadata = vec![Vec::new(); METADATA_ENTRIES];
        metadata[BlockMetadataIndex::TransactionsFilter as usize] =
            self.txs.iter().map(|tx| tx.validation as i32 as u8).collect();

        Block {
            header: Some(BlockHeader {
                number: self.number,
                previous_hash: self.previous_hash.clone(),
                data_hash: sha256(&data.concat()),
            }),
            data: Some(BlockData { data }),
            metadata: Some(BlockMetadata { metadata }),
        }
    }

    /// The block with the private data of every transaction that has some,
    /// keyed by transaction index.
    pub fn build(&self) -> BlockAndPrivateData {
        let private_data_map = self
            .txs
            .iter()
            .enumerate()
            .filter_map(|(i, tx)| tx.private_data().map(|pvt| (i as u64, pvt)))
            .collect();
        BlockAndPrivateData {
            block: Some(self.build_block()),
            private_data_map,
        }
    }
}
