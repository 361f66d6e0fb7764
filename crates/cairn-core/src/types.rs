//! Core data types: address handles, transaction views, checkpoints.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::ADDRESS_UNKNOWN;
use crate::error::StorageError;

/// Dense integer identifier for a registered address.
///
/// Handles are assigned monotonically from 0 and are never reused, so the
/// handle doubles as the slot index in the union-find forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressHandle(pub u64);

impl AddressHandle {
    /// Slot index of this handle.
    pub fn index(self) -> u64 {
        self.0
    }

    /// Big-endian storage key, so handles iterate in assignment order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode a handle from its storage key.
    pub fn from_key(bytes: &[u8]) -> Result<Self, StorageError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| StorageError::Corrupt {
            what: "address handle",
            detail: format!("expected 8 bytes, got {}", bytes.len()),
        })?;
        Ok(Self(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for AddressHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One side of a transaction: an address and the value it sends or receives.
///
/// A missing or null address deserializes to the `"Unknown"` sentinel and a
/// missing value to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    #[serde(default = "unknown_address", deserialize_with = "address_or_unknown")]
    pub address: String,
    #[serde(default)]
    pub value: u64,
}

impl TxEntry {
    pub fn new(address: impl Into<String>, value: u64) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

fn unknown_address() -> String {
    ADDRESS_UNKNOWN.to_string()
}

fn address_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let address = Option::<String>::deserialize(deserializer)?;
    Ok(address
        .filter(|a| !a.is_empty())
        .unwrap_or_else(unknown_address))
}

/// Read-only projection of a transaction, built per transaction by the
/// block source. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub txid: String,
    #[serde(default)]
    pub inputs: Vec<TxEntry>,
    #[serde(default)]
    pub outputs: Vec<TxEntry>,
}

impl TransactionView {
    /// A coinbase transaction has no inputs.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Distinct input addresses in first-seen order.
    pub fn distinct_input_addresses(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.inputs
            .iter()
            .map(|i| i.address.as_str())
            .filter(|a| seen.insert(*a))
            .collect()
    }

    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).fold(0, u64::saturating_add)
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).fold(0, u64::saturating_add)
    }
}

/// All transactions of one block, as delivered by a block source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub height: u64,
    #[serde(default)]
    pub transactions: Vec<TransactionView>,
}

/// Final cluster label of one registered address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub address: String,
    pub label: String,
}

/// Resume point written atomically with each store flush.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Checkpoint {
    /// Exclusive upper bound: every height below this has been clustered and flushed.
    pub last_block_processed: u64,
    pub handle_count: u64,
    pub approximate_storage_bytes: u64,
    /// Unix timestamp (seconds) when the checkpoint was written.
    pub written_at: i64,
}

impl Checkpoint {
    pub fn new(last_block_processed: u64, handle_count: u64, approximate_storage_bytes: u64) -> Self {
        Self {
            last_block_processed,
            handle_count,
            approximate_storage_bytes,
            written_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StorageError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let (checkpoint, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(checkpoint)
    }

    /// Approximate storage in mebibytes, for progress logs.
    pub fn storage_mib(&self) -> f64 {
        self.approximate_storage_bytes as f64 / (1024.0 * 1024.0)
    }
}
