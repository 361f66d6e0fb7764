//! Durable key/byte storage interface and in-memory implementation.
//!
//! The cluster store keeps all persistent state in five keyspaces
//! ([`Space`]). Every mutation is expressed as a [`WriteSet`] applied
//! atomically by [`ClusterBackend::write`]: either every operation in the set
//! becomes visible or none does. [`MemoryBackend`] is suitable for testing;
//! the production store uses RocksDB (cairn-node).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::StorageError;

/// Keyspaces of the persistent cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Space {
    /// Address string → handle (8 bytes, big-endian).
    AddressToHandle,
    /// Handle (8 bytes, big-endian) → address string.
    HandleToAddress,
    /// Root handle (8 bytes, big-endian) → cluster label.
    Labels,
    /// Page index (8 bytes, big-endian) → encoded forest page.
    ForestPages,
    /// Store-wide counters and the last checkpoint.
    Metadata,
}

impl Space {
    pub const ALL: [Space; 5] = [
        Space::AddressToHandle,
        Space::HandleToAddress,
        Space::Labels,
        Space::ForestPages,
        Space::Metadata,
    ];

    /// Column family name used by on-disk backends.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddressToHandle => "address_to_handle",
            Self::HandleToAddress => "handle_to_address",
            Self::Labels => "labels",
            Self::ForestPages => "forest_pages",
            Self::Metadata => "metadata",
        }
    }
}

/// A single put or delete inside a [`WriteSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { space: Space, key: Vec<u8>, value: Vec<u8> },
    Delete { space: Space, key: Vec<u8> },
}

/// Ordered collection of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, space: Space, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            space,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, space: Space, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete {
            space,
            key: key.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Durable key/byte store backing the cluster state.
///
/// Implementations must apply each [`WriteSet`] atomically and must make
/// everything written before a successful [`flush`](Self::flush) survive a
/// process restart.
pub trait ClusterBackend: Send + Sync {
    /// Read one value. Returns `None` if the key is absent.
    fn get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Apply all operations in `set` atomically.
    fn write(&self, set: WriteSet) -> Result<(), StorageError>;

    /// Force buffered writes to durable storage.
    fn flush(&self) -> Result<(), StorageError>;

    /// Read a little-endian `u64` from the metadata space, or 0 if absent.
    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, StorageError> {
        match self.get(Space::Metadata, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StorageError::Corrupt {
                    what: "metadata value",
                    detail: format!("expected 8 bytes, got {}", bytes.len()),
                })?;
                Ok(u64::from_le_bytes(raw))
            }
            None => Ok(0),
        }
    }
}

/// In-memory backend for tests.
///
/// Writes can be made to fail on demand to exercise error paths; a failed
/// write leaves the contents untouched.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    spaces: RwLock<HashMap<Space, BTreeMap<Vec<u8>, Vec<u8>>>>,
    fail_writes: AtomicBool,
    flushes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent [`write`](ClusterBackend::write) fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of entries in a keyspace.
    pub fn len(&self, space: Space) -> usize {
        self.spaces.read().get(&space).map_or(0, BTreeMap::len)
    }

    /// Number of successful flushes so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl ClusterBackend for MemoryBackend {
    fn get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .spaces
            .read()
            .get(&space)
            .and_then(|entries| entries.get(key).cloned()))
    }

    fn write(&self, set: WriteSet) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(format!(
                "memory backend refusing {} operation(s)",
                set.len()
            )));
        }
        let mut spaces = self.spaces.write();
        for op in set.into_ops() {
            match op {
                WriteOp::Put { space, key, value } => {
                    spaces.entry(space).or_default().insert(key, value);
                }
                WriteOp::Delete { space, key } => {
                    if let Some(entries) = spaces.get_mut(&space) {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
