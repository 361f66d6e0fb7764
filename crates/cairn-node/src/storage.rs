//! RocksDB-backed persistent cluster state.
//!
//! Implements [`ClusterBackend`] with one column family per [`Space`]. Every
//! [`WriteSet`] becomes a single atomic [`WriteBatch`].

use std::path::{Path, PathBuf};

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};

use cairn_core::backend::{ClusterBackend, Space, WriteOp, WriteSet};
use cairn_core::error::StorageError;

/// RocksDB-backed cluster storage.
pub struct RocksBackend {
    db: DB,
    path: PathBuf,
}

impl RocksBackend {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Space::ALL
            .iter()
            .map(|space| {
                let mut opts = Options::default();
                if *space == Space::ForestPages {
                    // Forest pages are 900 KB blobs rewritten whole.
                    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(space.name(), opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), "cluster database opened");
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the database at `path` and everything in it.
    pub fn destroy(path: impl AsRef<Path>) -> Result<(), StorageError> {
        DB::destroy(&Options::default(), path.as_ref())
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tracing::warn!(path = %path.as_ref().display(), "cluster database destroyed");
        Ok(())
    }

    /// Trigger manual compaction across all column families.
    pub fn compact(&self) -> Result<(), StorageError> {
        for space in Space::ALL {
            let cf = self.cf_handle(space)?;
            self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Estimated on-disk size of live data, summed over column families.
    pub fn estimated_live_bytes(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        for space in Space::ALL {
            let cf = self.cf_handle(space)?;
            total += self
                .db
                .property_int_value_cf(cf, "rocksdb.estimate-live-data-size")
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .unwrap_or(0);
        }
        Ok(total)
    }

    fn cf_handle(&self, space: Space) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(space.name())
            .ok_or_else(|| StorageError::MissingSpace(space.name().to_string()))
    }
}

impl ClusterBackend for RocksBackend {
    fn get(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf_handle(space)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn write(&self, set: WriteSet) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        for op in set.into_ops() {
            match op {
                WriteOp::Put { space, key, value } => {
                    batch.put_cf(self.cf_handle(space)?, key, value);
                }
                WriteOp::Delete { space, key } => {
                    batch.delete_cf(self.cf_handle(space)?, key);
                }
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteRejected(e.to_string()))
    }

    fn flush(&self) -> Result<(), StorageError> {
        for space in Space::ALL {
            let cf = self.cf_handle(space)?;
            self.db
                .flush_cf(cf)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}
