//! connectorhub-fabric reads committed Hyperledger Fabric blocks.
//!
//! Decoding is layered the same way the ledger nests its messages:
//!
//! ```text
//! Block ─► Envelope ─► Payload ─► Transaction ─► ChaincodeActionPayload
//!                        │                           └► ProposalResponsePayload
//!                        └► ChannelHeader (tx id)        └► ChaincodeAction
//!                                                            ├► ChaincodeEvent
//!                                                            └► TxReadWriteSet
//! ```
//!
//! [`Block`] is the decoded model; [`ConnectorEventUnmarshaler`] turns a
//! block plus its private data into resolved [`ConnectorEvent`]s.

pub mod block;
pub mod builder;
pub mod connector;
pub mod luther;
pub mod proto;
pub mod rwset;
mod summary;
pub mod unmarshal;

pub use block::{Block, Event, Transaction, TransactionDetails, TxValidation};
pub use connector::{ConnectorEvent, ConnectorEventUnmarshaler};
pub use luther::{
    scan_connector_headers, ConnectorEventHeader, LutherEventPayload, MAX_CONNECTOR_EVENTS_PER_TX,
};
pub use proto::BlockAndPrivateData;
pub use rwset::{pvt_write_set_value, NsRwSet, RwSet, Version};
