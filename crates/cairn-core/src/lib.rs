//! # cairn-core
//! Foundation types, traits, and per-transaction heuristics for Cairn.

pub mod backend;
pub mod change;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod script;
pub mod traits;
pub mod types;
