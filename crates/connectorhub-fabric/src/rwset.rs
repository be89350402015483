//! Read/write sets extracted from a transaction's chaincode action results.

use std::fmt;

use connectorhub_core::{ConnectorError, DecodeError};

use crate::proto::{self, TxPvtReadWriteSet};
use crate::unmarshal::{unmarshal_hashed_rw_set, unmarshal_kv_rw_set, unmarshal_tx_read_write_set};

/// Ledger height at which a key was last written. Display only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version {
    pub block_num: u64,
    pub tx_num: u64,
}

impl From<&proto::Version> for Version {
    fn from(v: &proto::Version) -> Self {
        Self {
            block_num: v.block_num,
            tx_num: v.tx_num,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.block_num, self.tx_num)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RSetRecord {
    pub key: String,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WSetRecord {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivRSetRecord {
    pub key_hash: Vec<u8>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivWSetRecord {
    pub key_hash: Vec<u8>,
    pub value_hash: Vec<u8>,
}

/// Public read and write set for a single namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RwSet {
    pub read_set: Vec<RSetRecord>,
    pub write_set: Vec<WSetRecord>,
}

impl RwSet {
    /// Value written for `key`, if any.
    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.write_set
            .iter()
            .find(|w| w.key == key)
            .map(|w| w.value.as_slice())
    }
}

/// Hashed read/write set of a private data collection as recorded in the
/// public block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PvtRwSet {
    pub collection_name: String,
    pub hashed_read_set: Vec<PrivRSetRecord>,
    pub hashed_write_set: Vec<PrivWSetRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NsRwSet {
    pub namespace: String,
    pub rw_set: RwSet,
    pub pvt_rw_sets: Vec<PvtRwSet>,
}

/// Decode a `KVRWSet` into its read and write records.
pub fn get_rw_set(bytes: &[u8]) -> Result<RwSet, DecodeError> {
    let kv = unmarshal_kv_rw_set(bytes)?;
    Ok(RwSet {
        read_set: kv
            .reads
            .iter()
            .map(|r| RSetRecord {
                key: r.key.clone(),
                version: r.version.as_ref().map(Version::from).unwrap_or_default(),
            })
            .collect(),
        write_set: kv
            .writes
            .into_iter()
            .map(|w| WSetRecord {
                key: w.key,
                value: w.value,
            })
            .collect(),
    })
}

fn get_pvt_rw_set(collection: &proto::CollectionHashedReadWriteSet) -> Result<PvtRwSet, DecodeError> {
    let hashed = unmarshal_hashed_rw_set(&collection.hashed_rwset)?;
    Ok(PvtRwSet {
        collection_name: collection.collection_name.clone(),
        hashed_read_set: hashed
            .hashed_reads
            .iter()
            .map(|r| PrivRSetRecord {
                key_hash: r.key_hash.clone(),
                version: r.version.as_ref().map(Version::from).unwrap_or_default(),
            })
            .collect(),
        hashed_write_set: hashed
            .hashed_writes
            .into_iter()
            .map(|w| PrivWSetRecord {
                key_hash: w.key_hash,
                value_hash: w.value_hash,
            })
            .collect(),
    })
}

/// Decode the `results` of a chaincode action into per-namespace sets.
///
/// Empty input means the action touched no state.
pub fn get_ns_rw_sets(results: &[u8]) -> Result<Vec<NsRwSet>, DecodeError> {
    if results.is_empty() {
        return Ok(Vec::new());
    }
    let tx_rw_set = unmarshal_tx_read_write_set(results)?;

    tx_rw_set
        .ns_rwset
        .iter()
        .map(|ns| -> Result<NsRwSet, DecodeError> {
            Ok(NsRwSet {
                namespace: ns.namespace.clone(),
                rw_set: get_rw_set(&ns.rwset)?,
                pvt_rw_sets: ns
                    .collection_hashed_rwset
                    .iter()
                    .map(get_pvt_rw_set)
                    .collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

/// Look up the value written for `key` in collection `pdc` of namespace `ns`
/// within a transaction's private data.
pub fn pvt_write_set_value(
    ns: &str,
    pdc: &str,
    key: &str,
    pvt: &TxPvtReadWriteSet,
) -> Result<Vec<u8>, ConnectorError> {
    if ns.is_empty() {
        return Err(ConnectorError::MissingData("missing namespace".into()));
    }
    if key.is_empty() {
        return Err(ConnectorError::MissingData("missing key".into()));
    }
    if pdc.is_empty() {
        return Err(ConnectorError::MissingData("missing PDC".into()));
    }

    for ns_set in pvt.ns_pvt_rwset.iter().filter(|n| n.namespace == ns) {
        for collection in ns_set
            .collection_pvt_rwset
            .iter()
            .filter(|c| c.collection_name == pdc)
        {
            let rw_set = get_rw_set(&collection.rwset)?;
            if let Some(value) = rw_set.value(key) {
                return Ok(value.to_vec());
            }
        }
    }

    Err(ConnectorError::MissingData(format!(
        "key not found in private collection [{pdc}:{key}]"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{kv_rw_set, pvt_data};

    #[test]
    fn version_display() {
        let v = Version {
            block_num: 12,
            tx_num: 3,
        };
        assert_eq!(v.to_string(), "(12:3)");
    }

    #[test]
    fn empty_results_have_no_sets() {
        assert!(get_ns_rw_sets(&[]).unwrap().is_empty());
    }

    #[test]
    fn rw_set_keeps_write_order() {
        let bytes = kv_rw_set(&[("a", b"1".as_slice()), ("b", b"2".as_slice())]);
        let set = get_rw_set(&bytes).unwrap();
        assert_eq!(set.write_set.len(), 2);
        assert_eq!(set.write_set[0].key, "a");
        assert_eq!(set.value("b"), Some(b"2".as_slice()));
        assert_eq!(set.value("c"), None);
    }

    #[test]
    fn pvt_lookup_finds_collection_key() {
        let pvt = pvt_data("cc", "private", &[("req", b"{\"a\":1}".as_slice())]);
        let value = pvt_write_set_value("cc", "private", "req", &pvt).unwrap();
        assert_eq!(value, b"{\"a\":1}");
    }

    #[test]
    fn pvt_lookup_wrong_collection_is_missing() {
        let pvt = pvt_data("cc", "private", &[("req", b"x".as_slice())]);
        let err = pvt_write_set_value("cc", "other", "req", &pvt).unwrap_err();
        assert!(err.is_missing_data());
        assert!(err.to_string().contains("[other:req]"));
    }

    #[test]
    fn pvt_lookup_validates_arguments() {
        let pvt = TxPvtReadWriteSet::default();
        for (ns, pdc, key, want) in [
            ("", "p", "k", "missing namespace"),
            ("cc", "p", "", "missing key"),
            ("cc", "", "k", "missing PDC"),
        ] {
            let err = pvt_write_set_value(ns, pdc, key, &pvt).unwrap_err();
            assert!(err.to_string().contains(want), "{err}");
        }
    }
}
