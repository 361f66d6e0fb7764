//! Batched, checkpointed co-spend clustering over a block-height range.
//!
//! Each batch of `batch_blocks` heights is clustered, then the store is
//! flushed together with a checkpoint naming the batch's end height in one
//! atomic write. A restart resumes from that checkpoint; re-processing a
//! partially applied batch is harmless because repeated unions are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use cairn_core::backend::ClusterBackend;
use cairn_core::error::CairnError;
use cairn_core::traits::TransactionSource;
use cairn_core::types::Checkpoint;
use cairn_forest::{ClusterStore, CoSpendClusterer, CoSpendStats};

use crate::config::ClusterConfig;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("batch {from}..{to} failed at {handle_count} handles: {source}")]
    Batch {
        from: u64,
        to: u64,
        handle_count: u64,
        #[source]
        source: CairnError,
    },
    #[error("invalid height range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },
    #[error(transparent)]
    Store(#[from] CairnError),
}

/// Outcome of a [`ClusteringDriver::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    /// Height the run actually started from, after applying any checkpoint.
    pub started_at: u64,
    /// Exclusive end of the last completed batch.
    pub last_block_processed: u64,
    pub batches: u64,
    pub handle_count: u64,
    pub stats: CoSpendStats,
    pub cancelled: bool,
}

pub struct ClusteringDriver<B: ClusterBackend, S: TransactionSource> {
    store: ClusterStore<B>,
    source: S,
    clusterer: CoSpendClusterer,
    batch_blocks: u64,
    checkpoint_interval_blocks: u64,
    cancel: Arc<AtomicBool>,
}

impl<B: ClusterBackend, S: TransactionSource> ClusteringDriver<B, S> {
    pub fn new(mut store: ClusterStore<B>, source: S, config: &ClusterConfig) -> Self {
        store.set_max_resident_pages(config.max_resident_pages);
        Self {
            store,
            source,
            clusterer: CoSpendClusterer::new(),
            batch_blocks: config.batch_blocks.max(1),
            checkpoint_interval_blocks: config.checkpoint_interval_blocks.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag; once set, the run stops at the next batch boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn store(&self) -> &ClusterStore<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ClusterStore<B> {
        &mut self.store
    }

    pub fn into_store(self) -> ClusterStore<B> {
        self.store
    }

    /// Cluster heights `[start, end)`, skipping whatever a previous run
    /// already checkpointed.
    pub fn run(&mut self, start: u64, end: u64) -> Result<DriverReport, DriverError> {
        if start > end {
            return Err(DriverError::InvalidRange { start, end });
        }
        let mut from = start;
        if let Some(checkpoint) = self.store.last_checkpoint()? {
            if checkpoint.last_block_processed > from {
                info!(
                    resume_from = checkpoint.last_block_processed,
                    handles = checkpoint.handle_count,
                    "resuming from checkpoint"
                );
                from = checkpoint.last_block_processed.min(end);
            }
        }

        let mut report = DriverReport {
            started_at: from,
            last_block_processed: from,
            batches: 0,
            handle_count: self.store.handle_count(),
            stats: CoSpendStats::default(),
            cancelled: false,
        };
        info!(from, end, batch_blocks = self.batch_blocks, "clustering started");

        while from < end {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(at = from, "clustering cancelled");
                report.cancelled = true;
                break;
            }
            let to = from.saturating_add(self.batch_blocks).min(end);
            let checkpoint = self.run_batch(from, to).map_err(|source| DriverError::Batch {
                from,
                to,
                handle_count: self.store.handle_count(),
                source,
            })?;

            let batch_stats = self.clusterer.take_stats();
            report.stats.absorb(batch_stats);
            report.batches += 1;
            report.last_block_processed = to;
            report.handle_count = self.store.handle_count();
            debug!(
                from,
                to,
                transactions = batch_stats.transactions,
                merges = batch_stats.merges,
                "batch clustered"
            );

            if to / self.checkpoint_interval_blocks > from / self.checkpoint_interval_blocks
                || to == end
            {
                info!(
                    height = to,
                    handles = report.handle_count,
                    storage_mib = checkpoint.storage_mib(),
                    merges = report.stats.merges,
                    "clustering progress"
                );
            }
            from = to;
        }

        Ok(report)
    }

    /// Cluster one batch and checkpoint it. Nothing is checkpointed on failure.
    fn run_batch(&mut self, from: u64, to: u64) -> Result<Checkpoint, CairnError> {
        let transactions = self.source.co_spend_transactions(from, to)?;
        for tx in &transactions {
            self.clusterer.process(&mut self.store, tx)?;
        }
        self.store.checkpoint(to)
    }
}
