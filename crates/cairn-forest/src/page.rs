//! Fixed-size pages of forest slots.
//!
//! Page `i` holds the slots for handles `i * FOREST_PAGE_SLOTS ..
//! (i + 1) * FOREST_PAGE_SLOTS`. On disk a page is all parents (u64
//! little-endian) followed by all ranks (one byte each).

use cairn_core::constants::{FOREST_PAGE_SLOTS, FOREST_SLOT_BYTES};
use cairn_core::error::StorageError;

/// Split a handle index into `(page index, slot within page)`.
pub fn locate(handle: u64) -> (u64, usize) {
    (handle / FOREST_PAGE_SLOTS, (handle % FOREST_PAGE_SLOTS) as usize)
}

/// Encoded size of one page in bytes.
pub const PAGE_BYTES: usize = (FOREST_PAGE_SLOTS * FOREST_SLOT_BYTES) as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestPage {
    index: u64,
    parents: Vec<u64>,
    ranks: Vec<u8>,
    dirty: bool,
}

impl ForestPage {
    /// A fresh page where every slot is its own root with rank 0.
    pub fn self_rooted(index: u64) -> Self {
        let first = index * FOREST_PAGE_SLOTS;
        Self {
            index,
            parents: (first..first + FOREST_PAGE_SLOTS).collect(),
            ranks: vec![0; FOREST_PAGE_SLOTS as usize],
            dirty: false,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn key(&self) -> [u8; 8] {
        Self::key_for(self.index)
    }

    pub fn key_for(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    pub fn parent(&self, slot: usize) -> u64 {
        self.parents[slot]
    }

    pub fn set_parent(&mut self, slot: usize, parent: u64) {
        if self.parents[slot] != parent {
            self.parents[slot] = parent;
            self.dirty = true;
        }
    }

    pub fn rank(&self, slot: usize) -> u8 {
        self.ranks[slot]
    }

    pub fn set_rank(&mut self, slot: usize, rank: u8) {
        if self.ranks[slot] != rank {
            self.ranks[slot] = rank;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PAGE_BYTES);
        for parent in &self.parents {
            out.extend_from_slice(&parent.to_le_bytes());
        }
        out.extend_from_slice(&self.ranks);
        out
    }

    pub fn decode(index: u64, bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() != PAGE_BYTES {
            return Err(StorageError::Corrupt {
                what: "forest page",
                detail: format!("page {index}: expected {PAGE_BYTES} bytes, got {}", bytes.len()),
            });
        }
        let split = FOREST_PAGE_SLOTS as usize * 8;
        let parents = bytes[..split]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect();
        Ok(Self {
            index,
            parents,
            ranks: bytes[split..].to_vec(),
            dirty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_splits_handles() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(FOREST_PAGE_SLOTS - 1), (0, FOREST_PAGE_SLOTS as usize - 1));
        assert_eq!(locate(FOREST_PAGE_SLOTS), (1, 0));
        assert_eq!(locate(2 * FOREST_PAGE_SLOTS + 5), (2, 5));
    }

    #[test]
    fn fresh_page_is_self_rooted() {
        let page = ForestPage::self_rooted(3);
        let first = 3 * FOREST_PAGE_SLOTS;
        assert_eq!(page.parent(0), first);
        assert_eq!(page.parent(17), first + 17);
        assert_eq!(page.rank(17), 0);
        assert!(!page.is_dirty());
    }

    #[test]
    fn writes_mark_dirty_only_on_change() {
        let mut page = ForestPage::self_rooted(0);
        page.set_parent(4, 4);
        page.set_rank(4, 0);
        assert!(!page.is_dirty());
        page.set_parent(4, 9);
        assert!(page.is_dirty());
        page.mark_clean();
        page.set_rank(9, 1);
        assert!(page.is_dirty());
    }

    #[test]
    fn encode_decode_preserves_slots() {
        let mut page = ForestPage::self_rooted(1);
        page.set_parent(10, 7);
        page.set_rank(7, 255);
        let bytes = page.encode();
        assert_eq!(bytes.len(), PAGE_BYTES);

        let decoded = ForestPage::decode(1, &bytes).unwrap();
        assert_eq!(decoded.parent(10), 7);
        assert_eq!(decoded.rank(7), 255);
        assert_eq!(decoded.parent(11), FOREST_PAGE_SLOTS + 11);
        assert!(!decoded.is_dirty());
    }

    #[test]
    fn decode_rejects_truncated_page() {
        let bytes = ForestPage::self_rooted(0).encode();
        let err = ForestPage::decode(0, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
