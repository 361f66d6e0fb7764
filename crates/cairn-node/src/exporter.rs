//! Final address → cluster label export.
//!
//! Walks every registered handle in order, resolves its root, and emits the
//! root's label. Roots without a label receive a fresh `Wallet-<uuid>` label
//! that is stored on the root, so a second export without intervening merges
//! produces the same assignments.

use tracing::{debug, info};
use uuid::Uuid;

use cairn_core::backend::ClusterBackend;
use cairn_core::constants::SYNTHETIC_LABEL_PREFIX;
use cairn_core::error::{CairnError, ForestError};
use cairn_core::traits::ClusterSink;
use cairn_core::types::{AddressHandle, ClusterAssignment};
use cairn_forest::ClusterStore;

use crate::config::ClusterConfig;

/// A new random cluster label.
pub fn synthetic_label() -> String {
    format!("{SYNTHETIC_LABEL_PREFIX}{}", Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub addresses: u64,
    pub generated_labels: u64,
    pub flushes: u64,
}

pub struct ClusterExporter {
    flush_every: u64,
}

impl ClusterExporter {
    pub fn new(flush_every: u64) -> Self {
        Self {
            flush_every: flush_every.max(1),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.export_flush_every)
    }

    /// Emit one assignment per registered address, in handle order.
    pub fn export<B: ClusterBackend>(
        &self,
        store: &mut ClusterStore<B>,
        sink: &mut impl ClusterSink,
    ) -> Result<ExportReport, CairnError> {
        let mut report = ExportReport::default();
        let total = store.handle_count();
        info!(addresses = total, "export started");

        for index in 0..total {
            let handle = AddressHandle(index);
            let address = store
                .address_of(handle)?
                .ok_or(ForestError::UnknownHandle(index))?;
            let root = store.find(handle)?;
            let label = match store.label(root)? {
                Some(label) => label,
                None => {
                    let label = synthetic_label();
                    store.set_label(root, &label)?;
                    report.generated_labels += 1;
                    label
                }
            };
            sink.emit(&ClusterAssignment { address, label })?;
            report.addresses += 1;

            if report.addresses % self.flush_every == 0 {
                store.flush()?;
                report.flushes += 1;
                debug!(exported = report.addresses, of = total, "export flushed");
            }
        }

        store.flush()?;
        report.flushes += 1;
        sink.finish()?;
        info!(
            addresses = report.addresses,
            generated_labels = report.generated_labels,
            "export finished"
        );
        Ok(report)
    }
}
