//! Shared helpers for property and end-to-end tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use cairn_core::backend::{ClusterBackend, MemoryBackend};
use cairn_core::types::{BlockView, TransactionView, TxEntry};
use cairn_forest::ClusterStore;

/// A deterministic P2PKH-looking address for index `i`.
pub fn addr(i: usize) -> String {
    format!("1Test{i:06}")
}

/// A fresh store over an in-memory backend.
pub fn memory_store() -> (ClusterStore<MemoryBackend>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = ClusterStore::open(backend.clone()).expect("open memory store");
    (store, backend)
}

/// A transaction spending one unit from each of `inputs` to `outputs`.
pub fn spend(txid: &str, inputs: &[&str], outputs: &[(&str, u64)]) -> TransactionView {
    TransactionView {
        txid: txid.to_string(),
        inputs: inputs.iter().map(|a| TxEntry::new(*a, 1)).collect(),
        outputs: outputs.iter().map(|(a, v)| TxEntry::new(*a, *v)).collect(),
    }
}

/// One block per transaction list, at consecutive heights starting at 0.
pub fn blocks_from_input_sets(sets: &[Vec<usize>]) -> Vec<BlockView> {
    sets.iter()
        .enumerate()
        .map(|(height, inputs)| {
            let names: Vec<String> = inputs.iter().map(|&i| addr(i)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            BlockView {
                height: height as u64,
                transactions: vec![spend(&format!("tx{height}"), &refs, &[("3Pay", 1)])],
            }
        })
        .collect()
}

/// Plain in-memory disjoint-set used as the reference model.
#[derive(Debug, Clone)]
pub struct NaiveDisjointSet {
    parent: Vec<usize>,
}

impl NaiveDisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        self.parent[x] = root;
        root
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx != ry {
            self.parent[rx] = ry;
        }
    }

    /// Groups of indices in `members` sharing a root.
    pub fn partition(&mut self, members: &BTreeSet<usize>) -> BTreeSet<BTreeSet<usize>> {
        let mut groups: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for &m in members {
            let root = self.find(m);
            groups.entry(root).or_default().insert(m);
        }
        groups.into_values().collect()
    }
}

/// Groups of address indices in `members` sharing a cluster in `store`.
///
/// Every member must be registered.
pub fn store_partition<B: ClusterBackend>(
    store: &mut ClusterStore<B>,
    members: &BTreeSet<usize>,
) -> BTreeSet<BTreeSet<usize>> {
    let mut groups: HashMap<u64, BTreeSet<usize>> = HashMap::new();
    for &m in members {
        let handle = store
            .lookup(&addr(m))
            .expect("lookup")
            .unwrap_or_else(|| panic!("{} not registered", addr(m)));
        let root = store.find(handle).expect("find");
        groups.entry(root.index()).or_default().insert(m);
    }
    groups.into_values().collect()
}
