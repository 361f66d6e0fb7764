//! # cairn-forest: Persistent address clustering.
//!
//! Implements the common-input-ownership heuristic over a disk-backed
//! disjoint-set forest:
//! - **Address registry**: durable address ↔ dense handle mapping.
//! - **Paged union-find**: parent/rank slots stored in fixed-size pages that
//!   grow ahead of need and are persisted before new handles use them. `find`
//!   uses full path compression; `union` merges by rank and migrates cluster
//!   labels to the surviving root.
//! - **Co-spend clustering**: all distinct input addresses of a transaction
//!   are merged into one cluster.
//!
//! All mutation goes through `&mut` receivers: there is exactly one writer.

pub mod cospend;
pub mod forest;
pub mod page;
pub mod registry;
pub mod store;

pub use cospend::{CoSpendClusterer, CoSpendStats};
pub use forest::UnionFindStore;
pub use registry::AddressRegistry;
pub use store::ClusterStore;
