//! Trait interfaces between Cairn crates and their collaborators:
//! - [`TransactionSource`]: block/transaction feed (cairn-node provides file-backed sources)
//! - [`ClusterSink`]: destination of exported address labels
//! - [`LabelLookup`]: address → cluster label resolution during annotation

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::error::{CairnError, SourceError};
use crate::types::{BlockView, ClusterAssignment, TransactionView};

/// Feed of decoded blocks, queried in ascending, non-overlapping height ranges.
pub trait TransactionSource {
    /// All blocks with heights in `[from, to)`, in height order.
    fn blocks(&mut self, from: u64, to: u64) -> Result<Vec<BlockView>, SourceError>;

    /// Transactions in `[from, to)` with at least two distinct input
    /// addresses. Only these carry co-spend information.
    fn co_spend_transactions(&mut self, from: u64, to: u64) -> Result<Vec<TransactionView>, SourceError> {
        Ok(self
            .blocks(from, to)?
            .into_iter()
            .flat_map(|block| block.transactions)
            .filter(|tx| tx.distinct_input_addresses().len() >= 2)
            .collect())
    }
}

/// In-memory source over pre-built blocks.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    blocks: Vec<BlockView>,
}

impl MemorySource {
    pub fn new(mut blocks: Vec<BlockView>) -> Self {
        blocks.sort_by_key(|b| b.height);
        Self { blocks }
    }
}

impl TransactionSource for MemorySource {
    fn blocks(&mut self, from: u64, to: u64) -> Result<Vec<BlockView>, SourceError> {
        Ok(self
            .blocks
            .iter()
            .filter(|b| b.height >= from && b.height < to)
            .cloned()
            .collect())
    }
}

/// Destination of exported `(address, label)` records.
pub trait ClusterSink {
    fn emit(&mut self, assignment: &ClusterAssignment) -> Result<(), CairnError>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<(), CairnError> {
        Ok(())
    }
}

impl ClusterSink for Vec<ClusterAssignment> {
    fn emit(&mut self, assignment: &ClusterAssignment) -> Result<(), CairnError> {
        self.push(assignment.clone());
        Ok(())
    }
}

/// Resolve the cluster label of an address, if it has one.
pub trait LabelLookup {
    fn label_for(&mut self, address: &str) -> Result<Option<String>, CairnError>;
}

impl<S: BuildHasher> LabelLookup for HashMap<String, String, S> {
    fn label_for(&mut self, address: &str) -> Result<Option<String>, CairnError> {
        Ok(self.get(address).cloned())
    }
}
