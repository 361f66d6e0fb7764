//! The cluster store: address registry and union-find forest sharing one
//! backend, flushed together.

use std::sync::Arc;

use cairn_core::backend::{ClusterBackend, Space, WriteSet};
use cairn_core::error::{CairnError, ForestError};
use cairn_core::traits::LabelLookup;
use cairn_core::types::{AddressHandle, Checkpoint};
use tracing::{debug, info};

use crate::forest::UnionFindStore;
use crate::registry::AddressRegistry;

const META_CHECKPOINT: &[u8] = b"checkpoint";

pub struct ClusterStore<B: ClusterBackend> {
    backend: Arc<B>,
    registry: AddressRegistry<B>,
    forest: UnionFindStore<B>,
}

impl<B: ClusterBackend> ClusterStore<B> {
    /// Open the store persisted in `backend`.
    ///
    /// Fails if the registry holds more handles than the forest has slots.
    pub fn open(backend: Arc<B>) -> Result<Self, CairnError> {
        let registry = AddressRegistry::open(backend.clone())?;
        let forest = UnionFindStore::open(backend.clone())?;
        if registry.len() > forest.capacity() {
            return Err(ForestError::HandleOutOfRange {
                handle: registry.len() - 1,
                capacity: forest.capacity(),
            }
            .into());
        }
        info!(
            handles = registry.len(),
            capacity = forest.capacity(),
            "cluster store opened"
        );
        Ok(Self {
            backend,
            registry,
            forest,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Number of registered addresses.
    pub fn handle_count(&self) -> u64 {
        self.registry.len()
    }

    pub fn capacity(&self) -> u64 {
        self.forest.capacity()
    }

    /// Cap the number of clean forest pages kept in memory.
    pub fn set_max_resident_pages(&mut self, max: usize) {
        self.forest.set_max_resident_pages(max);
    }

    pub fn resident_pages(&self) -> usize {
        self.forest.resident_pages()
    }

    pub fn grow_events(&self) -> u64 {
        self.forest.grow_events()
    }

    pub fn approximate_storage_bytes(&self) -> u64 {
        self.forest.approximate_storage_bytes()
    }

    /// Handle of `address`, registering it and reserving its forest slot if unseen.
    pub fn get_or_create(&mut self, address: &str) -> Result<AddressHandle, CairnError> {
        let forest = &mut self.forest;
        self.registry
            .get_or_create(address, |handle| forest.ensure_capacity(handle.index() + 1))
    }

    pub fn lookup(&self, address: &str) -> Result<Option<AddressHandle>, CairnError> {
        self.registry.lookup(address)
    }

    pub fn address_of(&self, handle: AddressHandle) -> Result<Option<String>, CairnError> {
        self.registry.address_of(handle)
    }

    pub fn find(&mut self, handle: AddressHandle) -> Result<AddressHandle, CairnError> {
        self.forest.find(handle)
    }

    pub fn union(&mut self, x: AddressHandle, y: AddressHandle) -> Result<bool, CairnError> {
        self.forest.union(x, y)
    }

    /// Register both addresses and merge their clusters.
    pub fn union_addresses(&mut self, x: &str, y: &str) -> Result<bool, CairnError> {
        let hx = self.get_or_create(x)?;
        let hy = self.get_or_create(y)?;
        self.forest.union(hx, hy)
    }

    /// Whether two registered addresses share a cluster. Unregistered
    /// addresses share nothing.
    pub fn same_cluster(&mut self, x: &str, y: &str) -> Result<bool, CairnError> {
        match (self.lookup(x)?, self.lookup(y)?) {
            (Some(hx), Some(hy)) => Ok(self.find(hx)? == self.find(hy)?),
            _ => Ok(false),
        }
    }

    pub fn label(&self, root: AddressHandle) -> Result<Option<String>, CairnError> {
        self.forest.label(root)
    }

    pub fn set_label(&mut self, root: AddressHandle, label: &str) -> Result<(), CairnError> {
        self.forest.set_label(root, label)
    }

    /// Label of the cluster containing `address`, if registered and labelled.
    pub fn resolve_label(&mut self, address: &str) -> Result<Option<String>, CairnError> {
        match self.lookup(address)? {
            Some(handle) => {
                let root = self.find(handle)?;
                self.label(root)
            }
            None => Ok(None),
        }
    }

    /// Register `address` and label its cluster, replacing any existing label.
    pub fn seed_label(&mut self, address: &str, label: &str) -> Result<AddressHandle, CairnError> {
        let handle = self.get_or_create(address)?;
        let root = self.find(handle)?;
        self.set_label(root, label)?;
        Ok(root)
    }

    /// Seed labels from an `(address, label)` side-table. Returns the number applied.
    pub fn seed_labels<I, A, L>(&mut self, entries: I) -> Result<u64, CairnError>
    where
        I: IntoIterator<Item = (A, L)>,
        A: AsRef<str>,
        L: AsRef<str>,
    {
        let mut seeded = 0;
        for (address, label) in entries {
            self.seed_label(address.as_ref(), label.as_ref())?;
            seeded += 1;
        }
        info!(seeded, "labels seeded");
        Ok(seeded)
    }

    /// The last checkpoint written, if any.
    pub fn last_checkpoint(&self) -> Result<Option<Checkpoint>, CairnError> {
        match self.backend.get(Space::Metadata, META_CHECKPOINT)? {
            Some(bytes) => Ok(Some(Checkpoint::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist registrations, merged pages and label changes in one atomic write.
    pub fn flush(&mut self) -> Result<(), CairnError> {
        self.commit(WriteSet::new())
    }

    /// Flush and record `last_block_processed` in the same atomic write.
    pub fn checkpoint(&mut self, last_block_processed: u64) -> Result<Checkpoint, CairnError> {
        let checkpoint = Checkpoint::new(
            last_block_processed,
            self.handle_count(),
            self.approximate_storage_bytes(),
        );
        let mut set = WriteSet::new();
        set.put(Space::Metadata, META_CHECKPOINT, checkpoint.encode()?);
        self.commit(set)?;
        debug!(
            last_block_processed,
            handles = checkpoint.handle_count,
            "checkpoint written"
        );
        Ok(checkpoint)
    }

    fn commit(&mut self, mut set: WriteSet) -> Result<(), CairnError> {
        let pending = self.registry.pending_len();
        let dirty = self.forest.dirty_pages();
        self.registry.stage(&mut set);
        self.forest.stage(&mut set);
        if !set.is_empty() {
            self.backend.write(set)?;
        }
        self.backend.flush()?;
        self.registry.mark_flushed();
        self.forest.mark_flushed();
        debug!(registrations = pending, dirty_pages = dirty, "store flushed");
        Ok(())
    }
}

impl<B: ClusterBackend> LabelLookup for ClusterStore<B> {
    fn label_for(&mut self, address: &str) -> Result<Option<String>, CairnError> {
        self.resolve_label(address)
    }
}
