//! Connector event extraction: Luther events → resolved request bodies.

use connectorhub_core::{ConnectorError, ResultExt};
use tracing::{debug, error};

use crate::block::{Block, Transaction};
use crate::luther::ConnectorEventHeader;
use crate::proto::{BlockAndPrivateData, TxPvtReadWriteSet};
use crate::rwset::pvt_write_set_value;

/// A connector request found on chain, with its body or the reason it could
/// not be resolved.
#[derive(Debug, Clone)]
pub struct ConnectorEvent {
    header: ConnectorEventHeader,
    block_number: u64,
    transaction_id: String,
    body: Result<Vec<u8>, ConnectorError>,
}

impl ConnectorEvent {
    pub fn new(
        header: ConnectorEventHeader,
        block_number: u64,
        transaction_id: impl Into<String>,
        body: Result<Vec<u8>, ConnectorError>,
    ) -> Self {
        // An empty body is never a valid request.
        let body = match body {
            Ok(b) if b.is_empty() => Err(ConnectorError::Resolution("empty request".into())),
            other => other,
        };
        Self {
            header,
            block_number,
            transaction_id: transaction_id.into(),
            body,
        }
    }

    pub fn header(&self) -> &ConnectorEventHeader {
        &self.header
    }

    pub fn request_id(&self) -> &str {
        &self.header.request_id
    }

    pub fn request_key(&self) -> &str {
        &self.header.request_key
    }

    pub fn request_pdc(&self) -> &str {
        &self.header.request_pdc
    }

    /// MSP meant to process this event.
    pub fn request_msp_id(&self) -> &str {
        &self.header.request_msp_id
    }

    /// Object that triggered the request.
    pub fn object_id(&self) -> &str {
        &self.header.object_id
    }

    /// Target system name.
    pub fn request_system(&self) -> &str {
        &self.header.request_system
    }

    /// English description of the request.
    pub fn request_english(&self) -> &str {
        &self.header.request_english
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// A copy of the resolved request body.
    pub fn request_body(&self) -> Result<Vec<u8>, ConnectorError> {
        self.body.clone()
    }

    /// Why the body could not be resolved, if it could not.
    pub fn error(&self) -> Option<&ConnectorError> {
        self.body.as_ref().err()
    }
}

/// Extracts connector events from blocks with private data.
#[derive(Debug, Clone, Default)]
pub struct ConnectorEventUnmarshaler {
    /// Only consider events from this chaincode (all when empty).
    pub ccid_filter: String,
    /// Drop headers addressed to a different MSP (keep all when empty).
    pub msp_filter: String,
}

impl ConnectorEventUnmarshaler {
    pub fn new(ccid_filter: impl Into<String>, msp_filter: impl Into<String>) -> Self {
        Self {
            ccid_filter: ccid_filter.into(),
            msp_filter: msp_filter.into(),
        }
    }

    /// Connector events of every valid transaction, in block order and in
    /// header declaration order within a transaction.
    ///
    /// Per-header failures are carried on the event. Only failures that make
    /// the whole block untrustworthy are returned as errors.
    pub fn unmarshal(&self, blk: &BlockAndPrivateData) -> Result<Vec<ConnectorEvent>, ConnectorError> {
        let raw = blk
            .block
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidBlock("nil block".into()))?;
        let block = Block::new(raw).context("new block")?;
        let block_no = block.block_num();

        let mut events = Vec::with_capacity(block.transactions().len());
        for (tx_num, tx) in block.transactions().iter().enumerate() {
            if !block.validation(tx_num).is_valid() {
                continue;
            }
            let Some(chain_event) = tx.event().filter(|e| e.is_luther_event()) else {
                continue;
            };

            let ccid = chain_event.chaincode_id();
            if ccid.is_empty() {
                return Err(ConnectorError::InvalidBlock(format!(
                    "missing chaincode ID [tx={}]",
                    tx.id()
                )));
            }
            if !self.ccid_filter.is_empty() && ccid != self.ccid_filter {
                debug!(block_no, ccid, want = %self.ccid_filter, "ignoring chaincode event from other chaincode");
                continue;
            }

            let payload = match chain_event.to_luther_event() {
                Ok(p) => p,
                Err(e) => {
                    error!(block_no, tx_id = tx.id(), error = %e, "invalid luther event, ignoring");
                    continue;
                }
            };
            if payload.headers.is_empty() {
                debug!(block_no, tx_id = tx.id(), "ignoring chaincode event, no connector events");
                continue;
            }

            let pvt = blk.private_data_map.get(&(tx_num as u64));
            for header in payload.headers {
                if !self.msp_filter.is_empty()
                    && !header.request_msp_id.is_empty()
                    && header.request_msp_id != self.msp_filter
                {
                    debug!(
                        block_no,
                        req_id = %header.request_id,
                        msp = %header.request_msp_id,
                        want = %self.msp_filter,
                        "ignoring connector event for other msp"
                    );
                    continue;
                }

                let body = resolve_body(ccid, &header, tx, pvt);
                if let Err(e) = &body {
                    debug!(block_no, req_id = %header.request_id, ns = ccid, error = %e, "unresolved connector event");
                }
                events.push(ConnectorEvent::new(header, block_no, tx.id(), body));
            }
        }

        debug!(block_no, num_events = events.len(), "unmarshalled connector events");
        Ok(events)
    }
}

/// Request body named by `header`, from the private collection it declares
/// or the public write set of `ns`.
fn resolve_body(
    ns: &str,
    header: &ConnectorEventHeader,
    tx: &Transaction,
    pvt: Option<&TxPvtReadWriteSet>,
) -> Result<Vec<u8>, ConnectorError> {
    header.validate()?;

    if header.request_pdc.is_empty() {
        return tx
            .details()
            .write_set_value(ns, &header.request_key)
            .context("request body");
    }

    let pvt = pvt.ok_or_else(|| {
        ConnectorError::MissingData("connector event missing private data".into())
    })?;
    pvt_write_set_value(ns, &header.request_pdc, &header.request_key, pvt).context("request body")
}
