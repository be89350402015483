//! Pure decode functions for the nested Fabric envelope layers.
//!
//! Every function is total: bytes in, a typed message or a [`DecodeError`]
//! naming the target message out. Nothing here logs or retries.

use connectorhub_core::DecodeError;
use prost::Message;

use crate::proto::{
    Block, BlockAndPrivateData, BlockMetadataIndex, ChaincodeAction, ChaincodeActionPayload,
    ChaincodeEvent, ChaincodeId, ChaincodeProposalPayload, ChannelHeader, Envelope, HashedRwSet,
    Header, KvRwSet, Payload, ProposalResponse, ProposalResponsePayload, Response,
    SerializedIdentity, SignatureHeader, Transaction, TransactionAction, TxPvtReadWriteSet,
    TxReadWriteSet,
};

fn decode<M: Message + Default>(message: &'static str, bytes: &[u8]) -> Result<M, DecodeError> {
    M::decode(bytes).map_err(|e| DecodeError::unmarshal(message, e))
}

pub fn unmarshal_block(bytes: &[u8]) -> Result<Block, DecodeError> {
    decode("Block", bytes)
}

pub fn unmarshal_block_and_private_data(bytes: &[u8]) -> Result<BlockAndPrivateData, DecodeError> {
    decode("BlockAndPrivateData", bytes)
}

pub fn unmarshal_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    decode("Envelope", bytes)
}

pub fn unmarshal_payload(bytes: &[u8]) -> Result<Payload, DecodeError> {
    decode("Payload", bytes)
}

pub fn unmarshal_header(bytes: &[u8]) -> Result<Header, DecodeError> {
    decode("Header", bytes)
}

pub fn unmarshal_channel_header(bytes: &[u8]) -> Result<ChannelHeader, DecodeError> {
    decode("ChannelHeader", bytes)
}

pub fn unmarshal_signature_header(bytes: &[u8]) -> Result<SignatureHeader, DecodeError> {
    decode("SignatureHeader", bytes)
}

pub fn unmarshal_serialized_identity(bytes: &[u8]) -> Result<SerializedIdentity, DecodeError> {
    decode("SerializedIdentity", bytes)
}

pub fn unmarshal_transaction(bytes: &[u8]) -> Result<Transaction, DecodeError> {
    decode("Transaction", bytes)
}

pub fn unmarshal_chaincode_action_payload(
    bytes: &[u8],
) -> Result<ChaincodeActionPayload, DecodeError> {
    decode("ChaincodeActionPayload", bytes)
}

pub fn unmarshal_chaincode_proposal_payload(
    bytes: &[u8],
) -> Result<ChaincodeProposalPayload, DecodeError> {
    decode("ChaincodeProposalPayload", bytes)
}

pub fn unmarshal_proposal_response(bytes: &[u8]) -> Result<ProposalResponse, DecodeError> {
    decode("ProposalResponse", bytes)
}

pub fn unmarshal_proposal_response_payload(
    bytes: &[u8],
) -> Result<ProposalResponsePayload, DecodeError> {
    decode("ProposalResponsePayload", bytes)
}

pub fn unmarshal_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    decode("Response", bytes)
}

pub fn unmarshal_chaincode_action(bytes: &[u8]) -> Result<ChaincodeAction, DecodeError> {
    decode("ChaincodeAction", bytes)
}

pub fn unmarshal_chaincode_id(bytes: &[u8]) -> Result<ChaincodeId, DecodeError> {
    decode("ChaincodeID", bytes)
}

pub fn unmarshal_chaincode_event(bytes: &[u8]) -> Result<ChaincodeEvent, DecodeError> {
    decode("ChaincodeEvent", bytes)
}

pub fn unmarshal_tx_read_write_set(bytes: &[u8]) -> Result<TxReadWriteSet, DecodeError> {
    decode("TxReadWriteSet", bytes)
}

pub fn unmarshal_kv_rw_set(bytes: &[u8]) -> Result<KvRwSet, DecodeError> {
    decode("KVRWSet", bytes)
}

pub fn unmarshal_hashed_rw_set(bytes: &[u8]) -> Result<HashedRwSet, DecodeError> {
    decode("HashedRWSet", bytes)
}

pub fn unmarshal_tx_pvt_read_write_set(bytes: &[u8]) -> Result<TxPvtReadWriteSet, DecodeError> {
    decode("TxPvtReadWriteSet", bytes)
}

/// Decode one entry of `BlockData::data` as an envelope.
pub fn envelope_from_block_data(data: &[u8]) -> Result<Envelope, DecodeError> {
    unmarshal_envelope(data)
}

/// Follow a transaction action down to its endorsed chaincode action.
pub fn chaincode_action_payloads(
    action: &TransactionAction,
) -> Result<(ChaincodeActionPayload, ChaincodeAction), DecodeError> {
    let cc_payload = unmarshal_chaincode_action_payload(&action.payload)?;

    let prp_bytes = match &cc_payload.action {
        Some(a) if !a.proposal_response_payload.is_empty() => &a.proposal_response_payload,
        _ => return Err(DecodeError::missing("ChaincodeActionPayload", "action")),
    };
    let prp = unmarshal_proposal_response_payload(prp_bytes)?;
    if prp.extension.is_empty() {
        return Err(DecodeError::missing("ProposalResponsePayload", "extension"));
    }

    let cc_action = unmarshal_chaincode_action(&prp.extension)?;
    Ok((cc_payload, cc_action))
}

/// Channel id taken from the first envelope of the block.
pub fn channel_id_from_block(block: &Block) -> Result<String, DecodeError> {
    let first = block
        .data
        .as_ref()
        .and_then(|d| d.data.first())
        .ok_or_else(|| DecodeError::Invalid {
            message: "Block",
            reason: "failed to retrieve channel id - block is empty".into(),
        })?;

    let envelope = envelope_from_block_data(first)?;
    let payload = unmarshal_payload(&envelope.payload)?;
    let header = payload
        .header
        .ok_or_else(|| DecodeError::missing("Payload", "header"))?;
    Ok(unmarshal_channel_header(&header.channel_header)?.channel_id)
}

/// Raw transactions-filter metadata: one validation code byte per transaction.
///
/// Returns an empty slice when the block carries no such metadata.
pub fn transactions_filter(block: &Block) -> &[u8] {
    block
        .metadata
        .as_ref()
        .and_then(|m| m.metadata.get(BlockMetadataIndex::TransactionsFilter as usize))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, TxBuilder};

    #[test]
    fn unmarshal_error_names_target() {
        let err = unmarshal_envelope(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.to_string().starts_with("error unmarshalling Envelope"));
    }

    #[test]
    fn decoding_is_idempotent() {
        let tx = TxBuilder::new("tx-1").chaincode("cc").build_envelope();
        let a = unmarshal_envelope(&tx).unwrap();
        let b = unmarshal_envelope(&tx).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn channel_id_from_first_envelope() {
        let block = BlockBuilder::new(3)
            .channel("luther")
            .tx(TxBuilder::new("tx-1").chaincode("cc"))
            .build_block();
        assert_eq!(channel_id_from_block(&block).unwrap(), "luther");
    }

    #[test]
    fn channel_id_from_empty_block_fails() {
        let block = BlockBuilder::new(3).build_block();
        assert!(channel_id_from_block(&block).is_err());
    }

    #[test]
    fn payloads_reach_chaincode_action() {
        let envelope = TxBuilder::new("tx-9")
            .chaincode("cc")
            .write("cc", "k", b"v")
            .build_envelope();
        let env = unmarshal_envelope(&envelope).unwrap();
        let payload = unmarshal_payload(&env.payload).unwrap();
        let tx = unmarshal_transaction(&payload.data).unwrap();
        let (_, action) = chaincode_action_payloads(&tx.actions[0]).unwrap();
        assert!(!action.results.is_empty());
    }

    #[test]
    fn payloads_without_action_fail() {
        let action = TransactionAction {
            header: vec![],
            payload: ChaincodeActionPayload::default().encode_to_vec(),
        };
        let err = chaincode_action_payloads(&action).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { field: "action", .. }));
    }

    #[test]
    fn filter_missing_is_empty() {
        let block = Block::default();
        assert!(transactions_filter(&block).is_empty());
    }
}
