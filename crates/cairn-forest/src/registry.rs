//! Durable bidirectional address ↔ handle registry.
//!
//! Handles are dense and assigned in first-seen order. New registrations are
//! buffered until the owning store flushes them; because pending handles are
//! always the contiguous range `committed..next`, the reverse mapping for
//! them is a plain vector.

use std::collections::HashMap;
use std::sync::Arc;

use cairn_core::backend::{ClusterBackend, Space, WriteSet};
use cairn_core::error::{CairnError, ForestError, StorageError};
use cairn_core::types::AddressHandle;

const META_HANDLE_COUNT: &[u8] = b"handle_count";

pub struct AddressRegistry<B: ClusterBackend> {
    backend: Arc<B>,
    /// Handles below this are durable.
    committed: u64,
    /// Addresses for handles `committed..committed + pending.len()`.
    pending: Vec<String>,
    pending_index: HashMap<String, AddressHandle>,
}

impl<B: ClusterBackend> AddressRegistry<B> {
    pub fn open(backend: Arc<B>) -> Result<Self, CairnError> {
        let committed = backend.get_meta_u64(META_HANDLE_COUNT)?;
        Ok(Self {
            backend,
            committed,
            pending: Vec::new(),
            pending_index: HashMap::new(),
        })
    }

    /// Total number of registered addresses, flushed or not.
    pub fn len(&self) -> u64 {
        self.committed + self.pending.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registrations not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle of `address`, if registered.
    pub fn lookup(&self, address: &str) -> Result<Option<AddressHandle>, CairnError> {
        if let Some(handle) = self.pending_index.get(address) {
            return Ok(Some(*handle));
        }
        match self.backend.get(Space::AddressToHandle, address.as_bytes())? {
            Some(bytes) => Ok(Some(AddressHandle::from_key(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Address registered under `handle`, if any.
    pub fn address_of(&self, handle: AddressHandle) -> Result<Option<String>, CairnError> {
        let index = handle.index();
        if index >= self.committed {
            return Ok(usize::try_from(index - self.committed)
                .ok()
                .and_then(|i| self.pending.get(i))
                .cloned());
        }
        match self.backend.get(Space::HandleToAddress, &handle.to_key())? {
            Some(bytes) => {
                let address = String::from_utf8(bytes).map_err(|e| StorageError::Corrupt {
                    what: "registered address",
                    detail: e.to_string(),
                })?;
                Ok(Some(address))
            }
            None => Ok(None),
        }
    }

    /// Return the handle of `address`, registering it if unseen.
    ///
    /// For a new address, `reserve` is called with the handle about to be
    /// assigned and must make its forest slot available. If `reserve` fails
    /// the address stays unregistered and the handle is not consumed.
    pub fn get_or_create(
        &mut self,
        address: &str,
        reserve: impl FnOnce(AddressHandle) -> Result<(), CairnError>,
    ) -> Result<AddressHandle, CairnError> {
        if let Some(handle) = self.lookup(address)? {
            return Ok(handle);
        }
        let handle = AddressHandle(self.len());
        if let Some(existing) = self.backend.get(Space::HandleToAddress, &handle.to_key())? {
            return Err(ForestError::DuplicateHandle {
                address: String::from_utf8_lossy(&existing).into_owned(),
                existing: handle.index(),
            }
            .into());
        }
        reserve(handle)?;
        self.pending.push(address.to_string());
        self.pending_index.insert(address.to_string(), handle);
        tracing::trace!(%handle, address, "registered address");
        Ok(handle)
    }

    /// Add pending registrations and the new handle count to `set`.
    pub fn stage(&self, set: &mut WriteSet) {
        if self.pending.is_empty() {
            return;
        }
        for (offset, address) in self.pending.iter().enumerate() {
            let handle = AddressHandle(self.committed + offset as u64);
            set.put(Space::AddressToHandle, address.as_bytes(), handle.to_key());
            set.put(Space::HandleToAddress, handle.to_key(), address.as_bytes());
        }
        set.put(Space::Metadata, META_HANDLE_COUNT, self.len().to_le_bytes());
    }

    /// Forget staged registrations once they are durable.
    pub fn mark_flushed(&mut self) {
        self.committed = self.len();
        self.pending.clear();
        self.pending_index.clear();
    }
}
