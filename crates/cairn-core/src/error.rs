//! Error types for Cairn.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("backend: {0}")] Backend(String),
    #[error("missing column family: {0}")] MissingSpace(String),
    #[error("corrupt {what}: {detail}")] Corrupt { what: &'static str, detail: String },
    #[error("codec: {0}")] Codec(String),
    #[error("write rejected: {0}")] WriteRejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForestError {
    #[error("handle {handle} out of range (capacity {capacity})")] HandleOutOfRange { handle: u64, capacity: u64 },
    #[error("handle {0} is not a root")] NotARoot(u64),
    #[error("address {address} already mapped to handle {existing}")] DuplicateHandle { address: String, existing: u64 },
    #[error("handle {0} has no registered address")] UnknownHandle(u64),
    #[error("forest page {0} missing from storage")] MissingPage(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("io: {0}")] Io(String),
    #[error("parse error at line {line}: {message}")] Parse { line: usize, message: String },
    #[error("blocks out of order: height {got} after {previous}")] OutOfOrder { previous: u64, got: u64 },
    #[error("range {from}..{to} rewinds behind height {cursor}")] Rewind { from: u64, to: u64, cursor: u64 },
}

#[derive(Error, Debug)]
pub enum CairnError {
    #[error(transparent)] Storage(#[from] StorageError),
    #[error(transparent)] Forest(#[from] ForestError),
    #[error(transparent)] Source(#[from] SourceError),
    #[error("config: {0}")] Config(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
