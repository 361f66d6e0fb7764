//! # cairn-node: Storage, orchestration, and export.
//!
//! Composes the clustering engine into a runnable pipeline:
//! - [`storage::RocksBackend`]: persistent cluster state backed by RocksDB
//! - [`driver::ClusteringDriver`]: batched, checkpointed co-spend clustering
//! - [`exporter::ClusterExporter`]: final address → label assignments
//! - [`source::JsonlSource`]: JSON-lines block feed
//! - [`labels`]: CSV label tables and ledger rows
//! - [`config::ClusterConfig`]: layered configuration

pub mod config;
pub mod driver;
pub mod exporter;
pub mod labels;
pub mod source;
pub mod storage;

pub use config::ClusterConfig;
pub use driver::{ClusteringDriver, DriverError, DriverReport};
pub use exporter::{ClusterExporter, ExportReport};
pub use source::JsonlSource;
pub use storage::RocksBackend;
