//! Paged, disk-backed union-find forest with root labels.
//!
//! Slots live in [`ForestPage`]s loaded lazily from the backend. Growth adds
//! whole self-rooted pages and persists each one, together with the new
//! capacity, in a single atomic write before any handle in it is handed out.
//! Merges and labels are buffered in memory until [`UnionFindStore::stage`]
//! adds them to the store's next flush.
//!
//! At most `max_resident_pages` clean pages stay loaded; the least recently
//! used clean page is dropped when another page is loaded, and again after
//! each flush. Dirty pages are never dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use cairn_core::backend::{ClusterBackend, Space, WriteSet};
use cairn_core::constants::{DEFAULT_MAX_RESIDENT_PAGES, FOREST_PAGE_SLOTS, FOREST_SLOT_BYTES};
use cairn_core::error::{CairnError, ForestError, StorageError};
use cairn_core::types::AddressHandle;

use crate::page::{locate, ForestPage};

const META_CAPACITY: &[u8] = b"forest_capacity";

pub struct UnionFindStore<B: ClusterBackend> {
    backend: Arc<B>,
    /// One entry per allocated page; `None` while not resident.
    pages: Vec<Option<ForestPage>>,
    /// Last access tick per page.
    last_used: Vec<u64>,
    /// Indices of loaded pages.
    resident: Vec<u64>,
    max_resident_pages: usize,
    clock: u64,
    /// Label changes not yet flushed: `Some` sets, `None` removes.
    pending_labels: BTreeMap<u64, Option<String>>,
    grow_events: u64,
}

impl<B: ClusterBackend> UnionFindStore<B> {
    /// Open the forest persisted in `backend`, or an empty one.
    pub fn open(backend: Arc<B>) -> Result<Self, CairnError> {
        let capacity = backend.get_meta_u64(META_CAPACITY)?;
        if capacity % FOREST_PAGE_SLOTS != 0 {
            return Err(StorageError::Corrupt {
                what: "forest capacity",
                detail: format!("{capacity} is not a multiple of {FOREST_PAGE_SLOTS}"),
            }
            .into());
        }
        let page_count = capacity / FOREST_PAGE_SLOTS;
        Ok(Self {
            backend,
            pages: (0..page_count).map(|_| None).collect(),
            last_used: vec![0; page_count as usize],
            resident: Vec::new(),
            max_resident_pages: DEFAULT_MAX_RESIDENT_PAGES,
            clock: 0,
            pending_labels: BTreeMap::new(),
            grow_events: 0,
        })
    }

    /// Number of allocated slots.
    pub fn capacity(&self) -> u64 {
        self.pages.len() as u64 * FOREST_PAGE_SLOTS
    }

    /// Limit the number of clean pages kept in memory. At least one page
    /// always stays resident.
    pub fn set_max_resident_pages(&mut self, max: usize) {
        self.max_resident_pages = max.max(1);
        self.evict_to(self.max_resident_pages);
    }

    pub fn max_resident_pages(&self) -> usize {
        self.max_resident_pages
    }

    /// Number of pages currently held in memory.
    pub fn resident_pages(&self) -> usize {
        self.resident.len()
    }

    /// Number of pages added since this store was opened.
    pub fn grow_events(&self) -> u64 {
        self.grow_events
    }

    /// On-disk footprint of the parent and rank arrays.
    pub fn approximate_storage_bytes(&self) -> u64 {
        self.capacity() * FOREST_SLOT_BYTES
    }

    /// Grow page by page until at least `required` slots exist.
    pub fn ensure_capacity(&mut self, required: u64) -> Result<(), CairnError> {
        while self.capacity() < required {
            self.grow()?;
        }
        Ok(())
    }

    /// Append one self-rooted page. The page and the enlarged capacity are
    /// written before the page becomes visible; on failure nothing changes.
    fn grow(&mut self) -> Result<(), CairnError> {
        let index = self.pages.len() as u64;
        let page = ForestPage::self_rooted(index);
        let new_capacity = (index + 1) * FOREST_PAGE_SLOTS;

        let mut set = WriteSet::new();
        set.put(Space::ForestPages, page.key(), page.encode());
        set.put(Space::Metadata, META_CAPACITY, new_capacity.to_le_bytes());
        self.backend.write(set)?;

        self.clock += 1;
        self.pages.push(Some(page));
        self.last_used.push(self.clock);
        self.resident.push(index);
        self.evict_to(self.max_resident_pages);
        self.grow_events += 1;
        tracing::info!(page = index, capacity = new_capacity, "forest grown");
        Ok(())
    }

    /// Find the root of `x`, re-pointing every node on the path directly at it.
    pub fn find(&mut self, x: AddressHandle) -> Result<AddressHandle, CairnError> {
        let capacity = self.capacity();
        let mut root = x.index();
        let mut steps = 0u64;
        loop {
            let parent = self.parent(root)?;
            if parent == root {
                break;
            }
            steps += 1;
            if steps > capacity {
                return Err(StorageError::Corrupt {
                    what: "forest",
                    detail: format!("parent chain from {x} does not reach a root"),
                }
                .into());
            }
            root = parent;
        }

        let mut node = x.index();
        while node != root {
            let next = self.parent(node)?;
            if next != root {
                self.set_parent(node, root)?;
            }
            node = next;
        }
        Ok(AddressHandle(root))
    }

    /// Merge the clusters of `x` and `y`. Returns `false` if they already
    /// shared a root.
    ///
    /// The root with the strictly higher rank survives; on equal rank `y`'s
    /// root absorbs `x`'s and its rank grows by one (saturating). If both
    /// roots are labelled, `x`'s label wins. The losing root's label is removed.
    pub fn union(&mut self, x: AddressHandle, y: AddressHandle) -> Result<bool, CairnError> {
        let root_x = self.find(x)?;
        let root_y = self.find(y)?;
        if root_x == root_y {
            return Ok(false);
        }

        let rank_x = self.rank(root_x.index())?;
        let rank_y = self.rank(root_y.index())?;
        let label_x = self.label(root_x)?;
        let label_y = self.label(root_y)?;

        let (winner, loser) = if rank_x > rank_y {
            (root_x, root_y)
        } else {
            (root_y, root_x)
        };
        self.set_parent(loser.index(), winner.index())?;
        if rank_x == rank_y {
            self.set_rank(winner.index(), rank_y.saturating_add(1))?;
        }

        let loser_had_label = if winner == root_x { label_y.is_some() } else { label_x.is_some() };
        if let Some(label) = label_x.or(label_y) {
            self.pending_labels.insert(winner.index(), Some(label));
        }
        if loser_had_label {
            self.pending_labels.insert(loser.index(), None);
        }
        Ok(true)
    }

    /// Label attached to `root`, if any.
    pub fn label(&self, root: AddressHandle) -> Result<Option<String>, CairnError> {
        if let Some(pending) = self.pending_labels.get(&root.index()) {
            return Ok(pending.clone());
        }
        match self.backend.get(Space::Labels, &root.to_key())? {
            Some(bytes) => {
                let label = String::from_utf8(bytes).map_err(|e| StorageError::Corrupt {
                    what: "cluster label",
                    detail: e.to_string(),
                })?;
                Ok(Some(label).filter(|l| !l.is_empty()))
            }
            None => Ok(None),
        }
    }

    /// Attach `label` to `root`, replacing any existing one. An empty label clears it.
    pub fn set_label(&mut self, root: AddressHandle, label: &str) -> Result<(), CairnError> {
        if self.parent(root.index())? != root.index() {
            return Err(ForestError::NotARoot(root.index()).into());
        }
        let value = (!label.is_empty()).then(|| label.to_string());
        self.pending_labels.insert(root.index(), value);
        Ok(())
    }

    /// Rank of a slot.
    pub fn rank(&mut self, handle: u64) -> Result<u8, CairnError> {
        let (page, slot) = locate(handle);
        Ok(self.page_for(handle, page)?.rank(slot))
    }

    /// Direct parent of a slot, without compression.
    pub fn parent(&mut self, handle: u64) -> Result<u64, CairnError> {
        let (page, slot) = locate(handle);
        Ok(self.page_for(handle, page)?.parent(slot))
    }

    /// Number of loaded pages with unflushed changes.
    pub fn dirty_pages(&self) -> usize {
        self.pages.iter().flatten().filter(|p| p.is_dirty()).count()
    }

    /// Add dirty pages and pending label changes to `set`.
    pub fn stage(&self, set: &mut WriteSet) {
        for page in self.pages.iter().flatten().filter(|p| p.is_dirty()) {
            set.put(Space::ForestPages, page.key(), page.encode());
        }
        for (root, label) in &self.pending_labels {
            let key = AddressHandle(*root).to_key();
            match label {
                Some(label) => set.put(Space::Labels, key, label.as_bytes()),
                None => set.delete(Space::Labels, key),
            }
        }
    }

    /// Forget staged changes once they are durable, then trim resident
    /// pages back to the budget.
    pub fn mark_flushed(&mut self) {
        for page in self.pages.iter_mut().flatten() {
            page.mark_clean();
        }
        self.pending_labels.clear();
        self.evict_to(self.max_resident_pages);
    }

    /// Drop least recently used clean pages until at most `limit` remain.
    fn evict_to(&mut self, limit: usize) {
        while self.resident.len() > limit {
            let victim = self
                .resident
                .iter()
                .enumerate()
                .filter(|&(_, &page)| {
                    self.pages[page as usize]
                        .as_ref()
                        .is_some_and(|p| !p.is_dirty())
                })
                .min_by_key(|&(_, &page)| self.last_used[page as usize]);
            let Some((position, &page)) = victim else {
                break;
            };
            self.pages[page as usize] = None;
            self.resident.swap_remove(position);
        }
    }

    fn set_parent(&mut self, handle: u64, parent: u64) -> Result<(), CairnError> {
        let (page, slot) = locate(handle);
        self.page_for(handle, page)?.set_parent(slot, parent);
        Ok(())
    }

    fn set_rank(&mut self, handle: u64, rank: u8) -> Result<(), CairnError> {
        let (page, slot) = locate(handle);
        self.page_for(handle, page)?.set_rank(slot, rank);
        Ok(())
    }

    /// The page holding `handle`, loading it from the backend if it is not resident.
    fn page_for(&mut self, handle: u64, page: u64) -> Result<&mut ForestPage, CairnError> {
        let capacity = self.capacity();
        let index = usize::try_from(page)
            .ok()
            .filter(|&i| i < self.pages.len())
            .ok_or(ForestError::HandleOutOfRange { handle, capacity })?;

        self.clock += 1;
        self.last_used[index] = self.clock;
        if self.pages[index].is_none() {
            let bytes = self
                .backend
                .get(Space::ForestPages, &ForestPage::key_for(page))?
                .ok_or(ForestError::MissingPage(page))?;
            let loaded = ForestPage::decode(page, &bytes)?;
            self.evict_to(self.max_resident_pages.saturating_sub(1));
            self.pages[index] = Some(loaded);
            self.resident.push(page);
        }
        self.pages[index]
            .as_mut()
            .ok_or_else(|| ForestError::MissingPage(page).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::backend::MemoryBackend;
    use proptest::prelude::*;

    fn forest(slots: u64) -> (UnionFindStore<MemoryBackend>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let mut forest = UnionFindStore::open(backend.clone()).unwrap();
        forest.ensure_capacity(slots).unwrap();
        (forest, backend)
    }

    fn h(i: u64) -> AddressHandle {
        AddressHandle(i)
    }

    fn flush(forest: &mut UnionFindStore<MemoryBackend>, backend: &MemoryBackend) {
        let mut set = WriteSet::new();
        forest.stage(&mut set);
        backend.write(set).unwrap();
        forest.mark_flushed();
    }

    // --- Growth ---

    #[test]
    fn empty_forest_has_no_capacity() {
        let backend = Arc::new(MemoryBackend::new());
        let forest = UnionFindStore::open(backend).unwrap();
        assert_eq!(forest.capacity(), 0);
    }

    #[test]
    fn grows_in_whole_pages() {
        let (forest, backend) = forest(1);
        assert_eq!(forest.capacity(), FOREST_PAGE_SLOTS);
        assert_eq!(forest.grow_events(), 1);
        assert_eq!(backend.len(Space::ForestPages), 1);
        assert_eq!(backend.get_meta_u64(META_CAPACITY).unwrap(), FOREST_PAGE_SLOTS);
    }

    #[test]
    fn growth_preserves_existing_slots() {
        let (mut forest, _backend) = forest(10);
        forest.union(h(1), h(2)).unwrap();
        forest.ensure_capacity(FOREST_PAGE_SLOTS + 1).unwrap();
        assert_eq!(forest.grow_events(), 2);
        assert_eq!(forest.find(h(1)).unwrap(), forest.find(h(2)).unwrap());
        let last = FOREST_PAGE_SLOTS * 2 - 1;
        assert_eq!(forest.find(h(last)).unwrap(), h(last));
        assert_eq!(forest.rank(last).unwrap(), 0);
    }

    #[test]
    fn failed_growth_changes_nothing() {
        let (mut forest, backend) = forest(1);
        backend.set_fail_writes(true);
        let err = forest.ensure_capacity(FOREST_PAGE_SLOTS + 1).unwrap_err();
        assert!(matches!(err, CairnError::Storage(StorageError::WriteRejected(_))));
        assert_eq!(forest.capacity(), FOREST_PAGE_SLOTS);
        backend.set_fail_writes(false);
        assert_eq!(backend.get_meta_u64(META_CAPACITY).unwrap(), FOREST_PAGE_SLOTS);
        assert!(forest.find(h(FOREST_PAGE_SLOTS)).is_err());
    }

    #[test]
    fn out_of_range_handle_is_rejected() {
        let (mut forest, _backend) = forest(1);
        let err = forest.find(h(FOREST_PAGE_SLOTS)).unwrap_err();
        assert!(matches!(
            err,
            CairnError::Forest(ForestError::HandleOutOfRange { .. })
        ));
    }

    // --- Find / union ---

    #[test]
    fn union_joins_roots() {
        let (mut forest, _backend) = forest(10);
        assert!(forest.union(h(1), h(2)).unwrap());
        assert_eq!(forest.find(h(1)).unwrap(), forest.find(h(2)).unwrap());
        assert!(!forest.union(h(2), h(1)).unwrap(), "second union is a no-op");
    }

    #[test]
    fn equal_rank_second_root_wins() {
        let (mut forest, _backend) = forest(10);
        forest.union(h(3), h(4)).unwrap();
        assert_eq!(forest.find(h(3)).unwrap(), h(4));
        assert_eq!(forest.rank(4).unwrap(), 1);
        assert_eq!(forest.rank(3).unwrap(), 0);
    }

    #[test]
    fn higher_rank_root_wins() {
        let (mut forest, _backend) = forest(10);
        forest.union(h(1), h(2)).unwrap(); // root 2, rank 1
        forest.union(h(2), h(3)).unwrap(); // rank 1 beats rank 0
        assert_eq!(forest.find(h(3)).unwrap(), h(2));
        assert_eq!(forest.rank(2).unwrap(), 1);
    }

    #[test]
    fn find_compresses_full_path() {
        let (mut forest, _backend) = forest(10);
        // Build a chain 0 -> 1 -> 2 -> 3 by hand.
        forest.set_parent(0, 1).unwrap();
        forest.set_parent(1, 2).unwrap();
        forest.set_parent(2, 3).unwrap();
        assert_eq!(forest.find(h(0)).unwrap(), h(3));
        assert_eq!(forest.parent(0).unwrap(), 3);
        assert_eq!(forest.parent(1).unwrap(), 3);
        assert_eq!(forest.parent(2).unwrap(), 3);
    }

    #[test]
    fn find_is_idempotent() {
        let (mut forest, _backend) = forest(10);
        forest.union(h(5), h(6)).unwrap();
        forest.union(h(6), h(7)).unwrap();
        let root = forest.find(h(5)).unwrap();
        assert_eq!(forest.find(root).unwrap(), root);
    }

    #[test]
    fn cycle_is_reported_as_corruption() {
        let (mut forest, _backend) = forest(10);
        forest.set_parent(0, 1).unwrap();
        forest.set_parent(1, 0).unwrap();
        assert!(matches!(
            forest.find(h(0)).unwrap_err(),
            CairnError::Storage(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn rank_saturates() {
        let (mut forest, _backend) = forest(10);
        forest.set_rank(0, u8::MAX).unwrap();
        forest.set_rank(1, u8::MAX).unwrap();
        forest.union(h(0), h(1)).unwrap();
        assert_eq!(forest.find(h(0)).unwrap(), h(1));
        assert_eq!(forest.rank(1).unwrap(), u8::MAX);
    }

    // --- Labels ---

    #[test]
    fn label_moves_to_surviving_root() {
        let (mut forest, _backend) = forest(10);
        forest.set_label(h(1), "Exchange").unwrap();
        forest.union(h(1), h(2)).unwrap(); // root 2 survives
        assert_eq!(forest.label(h(2)).unwrap().as_deref(), Some("Exchange"));
        assert_eq!(forest.label(h(1)).unwrap(), None);
    }

    #[test]
    fn first_argument_label_wins_conflict() {
        let (mut forest, _backend) = forest(10);
        forest.set_label(h(1), "left").unwrap();
        forest.set_label(h(2), "right").unwrap();
        forest.union(h(1), h(2)).unwrap();
        let root = forest.find(h(1)).unwrap();
        assert_eq!(root, h(2));
        assert_eq!(forest.label(root).unwrap().as_deref(), Some("left"));
        assert_eq!(forest.label(h(1)).unwrap(), None);
    }

    #[test]
    fn label_survives_when_winner_keeps_its_own() {
        let (mut forest, _backend) = forest(10);
        forest.union(h(1), h(2)).unwrap(); // root 2, rank 1
        forest.set_label(h(2), "cluster").unwrap();
        forest.union(h(3), h(1)).unwrap(); // root 2 absorbs 3
        assert_eq!(forest.label(h(2)).unwrap().as_deref(), Some("cluster"));
    }

    #[test]
    fn set_label_requires_root() {
        let (mut forest, _backend) = forest(10);
        forest.union(h(1), h(2)).unwrap();
        assert!(matches!(
            forest.set_label(h(1), "x").unwrap_err(),
            CairnError::Forest(ForestError::NotARoot(1))
        ));
    }

    #[test]
    fn labels_persist_after_flush_and_losers_are_deleted() {
        let (mut forest, backend) = forest(10);
        forest.set_label(h(1), "a").unwrap();
        flush(&mut forest, &backend);
        assert_eq!(backend.len(Space::Labels), 1);

        forest.union(h(1), h(2)).unwrap();
        flush(&mut forest, &backend);
        assert_eq!(backend.len(Space::Labels), 1);
        assert_eq!(
            backend.get(Space::Labels, &h(2).to_key()).unwrap(),
            Some(b"a".to_vec())
        );
    }

    // --- Residency ---

    #[test]
    fn flush_trims_to_resident_budget() {
        let backend = Arc::new(MemoryBackend::new());
        let mut forest = UnionFindStore::open(backend.clone()).unwrap();
        forest.set_max_resident_pages(2);
        forest.ensure_capacity(20 * FOREST_PAGE_SLOTS).unwrap();
        assert_eq!(forest.resident_pages(), 2);

        for p in 0..20 {
            let base = p * FOREST_PAGE_SLOTS;
            assert!(forest.union(h(base), h(base + 1)).unwrap());
        }
        assert_eq!(forest.dirty_pages(), 20);
        assert_eq!(forest.resident_pages(), 20);

        flush(&mut forest, &backend);
        assert_eq!(forest.dirty_pages(), 0);
        assert!(forest.resident_pages() <= 2);

        for p in 0..20 {
            let base = p * FOREST_PAGE_SLOTS;
            assert_eq!(forest.find(h(base)).unwrap(), h(base + 1));
            assert!(forest.resident_pages() <= 2);
        }
    }

    #[test]
    fn dirty_pages_stay_resident_over_budget() {
        let (mut forest, backend) = forest(3 * FOREST_PAGE_SLOTS);
        forest.set_max_resident_pages(1);
        forest.union(h(0), h(FOREST_PAGE_SLOTS)).unwrap();
        assert_eq!(forest.find(h(2 * FOREST_PAGE_SLOTS)).unwrap(), h(2 * FOREST_PAGE_SLOTS));
        assert_eq!(forest.dirty_pages(), 2);
        assert_eq!(forest.resident_pages(), 3);
        assert_eq!(forest.find(h(0)).unwrap(), h(FOREST_PAGE_SLOTS));

        flush(&mut forest, &backend);
        assert_eq!(forest.resident_pages(), 1);
        assert_eq!(forest.find(h(0)).unwrap(), h(FOREST_PAGE_SLOTS));
    }

    #[test]
    fn budget_is_at_least_one_page() {
        let (mut forest, _backend) = forest(2 * FOREST_PAGE_SLOTS);
        forest.set_max_resident_pages(0);
        assert_eq!(forest.max_resident_pages(), 1);
        assert_eq!(forest.resident_pages(), 1);
    }

    // --- Persistence ---

    #[test]
    fn reopen_sees_flushed_merges() {
        let (mut forest, backend) = forest(10);
        forest.union(h(1), h(2)).unwrap();
        assert_eq!(forest.dirty_pages(), 1);
        flush(&mut forest, &backend);
        assert_eq!(forest.dirty_pages(), 0);

        let mut reopened = UnionFindStore::open(backend).unwrap();
        assert_eq!(reopened.capacity(), FOREST_PAGE_SLOTS);
        assert_eq!(reopened.find(h(1)).unwrap(), h(2));
    }

    #[test]
    fn reopen_drops_unflushed_merges() {
        let (mut forest, backend) = forest(10);
        forest.union(h(1), h(2)).unwrap();
        let mut reopened = UnionFindStore::open(backend).unwrap();
        assert_eq!(reopened.find(h(1)).unwrap(), h(1));
    }

    #[test]
    fn corrupt_capacity_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let mut set = WriteSet::new();
        set.put(Space::Metadata, META_CAPACITY, 7u64.to_le_bytes());
        backend.write(set).unwrap();
        assert!(UnionFindStore::open(backend).is_err());
    }

    // --- Properties ---

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn unions_connect_and_find_is_idempotent(
            pairs in prop::collection::vec((0u64..64, 0u64..64), 0..80),
        ) {
            let (mut forest, _backend) = forest(64);
            for &(a, b) in &pairs {
                forest.union(h(a), h(b)).unwrap();
                prop_assert_eq!(forest.find(h(a)).unwrap(), forest.find(h(b)).unwrap());
            }
            for i in 0..64 {
                let root = forest.find(h(i)).unwrap();
                prop_assert_eq!(forest.find(root).unwrap(), root);
                prop_assert_eq!(forest.parent(root.index()).unwrap(), root.index());
            }
            for &(a, b) in &pairs {
                prop_assert_eq!(forest.find(h(a)).unwrap(), forest.find(h(b)).unwrap());
            }
        }

        #[test]
        fn at_most_one_label_per_cluster(
            labelled in prop::collection::vec(0u64..32, 0..10),
            pairs in prop::collection::vec((0u64..32, 0u64..32), 0..40),
        ) {
            let (mut forest, _backend) = forest(32);
            for &i in &labelled {
                let root = forest.find(h(i)).unwrap();
                forest.set_label(root, &format!("L{i}")).unwrap();
            }
            for &(a, b) in &pairs {
                forest.union(h(a), h(b)).unwrap();
            }
            for i in 0..32 {
                let root = forest.find(h(i)).unwrap();
                if root.index() != i {
                    prop_assert_eq!(forest.label(h(i)).unwrap(), None);
                }
            }
        }
    }
}
