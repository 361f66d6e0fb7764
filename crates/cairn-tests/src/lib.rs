//! Property and end-to-end test suite for Cairn.
//!
//! Integration tests drive the clustering engine through its public API and
//! check the partition it produces against a plain in-memory disjoint-set.

pub mod helpers;
