//! Clustering configuration.
//!
//! [`ClusterConfig`] has defaults for every field. [`ClusterConfig::load`]
//! layers an optional TOML file and `CAIRN_*` environment variables on top;
//! command-line flags are applied by the binary afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cairn_core::constants::{
    DEFAULT_BATCH_BLOCKS, DEFAULT_CHECKPOINT_INTERVAL_BLOCKS, DEFAULT_EXPORT_FLUSH_EVERY,
    DEFAULT_MAX_RESIDENT_PAGES,
};
use cairn_core::error::CairnError;

/// Prefix of environment variables read by [`ClusterConfig::load`].
pub const ENV_PREFIX: &str = "CAIRN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Block heights fetched and clustered per batch.
    pub batch_blocks: u64,
    /// Height interval between progress reports.
    pub checkpoint_interval_blocks: u64,
    /// Exported addresses between flushes of generated labels.
    pub export_flush_every: u64,
    /// Clean forest pages kept in memory between flushes.
    pub max_resident_pages: usize,
    /// Log level filter string (e.g. "info", "cairn_forest=debug").
    pub log_level: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cairn");

        Self {
            data_dir,
            batch_blocks: DEFAULT_BATCH_BLOCKS,
            checkpoint_interval_blocks: DEFAULT_CHECKPOINT_INTERVAL_BLOCKS,
            export_flush_every: DEFAULT_EXPORT_FLUSH_EVERY,
            max_resident_pages: DEFAULT_MAX_RESIDENT_PAGES,
            log_level: "info".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Load defaults, then `file` (if given and present), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, CairnError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let cfg: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CairnError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the driver cannot run with.
    pub fn validate(&self) -> Result<(), CairnError> {
        if self.batch_blocks == 0 {
            return Err(CairnError::Config("batch_blocks must be positive".into()));
        }
        if self.checkpoint_interval_blocks == 0 {
            return Err(CairnError::Config(
                "checkpoint_interval_blocks must be positive".into(),
            ));
        }
        if self.export_flush_every == 0 {
            return Err(CairnError::Config("export_flush_every must be positive".into()));
        }
        if self.max_resident_pages == 0 {
            return Err(CairnError::Config("max_resident_pages must be positive".into()));
        }
        Ok(())
    }

    /// Path to the RocksDB cluster data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("clusterdata")
    }
}
