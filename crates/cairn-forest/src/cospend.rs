//! Common-input-ownership clustering.
//!
//! Every distinct input address of a transaction is assumed to be controlled
//! by the same entity, so all of them are merged into one cluster. Sentinel
//! addresses (`Unknown`, `Fee`, `the-void`) carry no ownership information
//! and are dropped first.

use std::collections::HashSet;

use cairn_core::backend::ClusterBackend;
use cairn_core::constants::is_sentinel;
use cairn_core::error::CairnError;
use cairn_core::types::TransactionView;

use crate::store::ClusterStore;

/// Running totals for a clustering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoSpendStats {
    /// Transactions that produced at least one union call.
    pub transactions: u64,
    /// Transactions with fewer than two usable input addresses.
    pub skipped: u64,
    /// Union calls issued.
    pub unions: u64,
    /// Union calls that actually joined two clusters.
    pub merges: u64,
}

impl CoSpendStats {
    pub fn absorb(&mut self, other: CoSpendStats) {
        self.transactions += other.transactions;
        self.skipped += other.skipped;
        self.unions += other.unions;
        self.merges += other.merges;
    }
}

#[derive(Debug, Default)]
pub struct CoSpendClusterer {
    stats: CoSpendStats,
}

impl CoSpendClusterer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CoSpendStats {
        self.stats
    }

    /// Reset and return the totals accumulated so far.
    pub fn take_stats(&mut self) -> CoSpendStats {
        std::mem::take(&mut self.stats)
    }

    /// Merge the input addresses of `tx`. Returns the number of merges.
    pub fn process<B: ClusterBackend>(
        &mut self,
        store: &mut ClusterStore<B>,
        tx: &TransactionView,
    ) -> Result<u64, CairnError> {
        self.process_addresses(store, tx.inputs.iter().map(|input| input.address.as_str()))
    }

    /// Merge an arbitrary set of co-spent addresses. Duplicates collapse;
    /// fewer than two distinct usable addresses is a no-op.
    pub fn process_addresses<'a, B: ClusterBackend>(
        &mut self,
        store: &mut ClusterStore<B>,
        addresses: impl IntoIterator<Item = &'a str>,
    ) -> Result<u64, CairnError> {
        let mut seen = HashSet::new();
        let distinct: Vec<&str> = addresses
            .into_iter()
            .filter(|address| !address.is_empty() && !is_sentinel(address))
            .filter(|address| seen.insert(*address))
            .collect();

        let Some((pivot, others)) = distinct.split_first().filter(|_| distinct.len() >= 2) else {
            self.stats.skipped += 1;
            return Ok(0);
        };

        let pivot = store.get_or_create(pivot)?;
        let mut merges = 0;
        for address in others {
            let handle = store.get_or_create(address)?;
            if store.union(pivot, handle)? {
                merges += 1;
            }
            self.stats.unions += 1;
        }
        self.stats.transactions += 1;
        self.stats.merges += merges;
        Ok(merges)
    }
}
