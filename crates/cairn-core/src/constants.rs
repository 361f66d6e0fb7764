//! Clustering constants and sentinel address values.

/// Placeholder for an input or output whose address could not be decoded.
pub const ADDRESS_UNKNOWN: &str = "Unknown";

/// Synthetic address used for fee rows in the ledger.
pub const ADDRESS_FEE: &str = "Fee";

/// Destination of provably unspendable outputs.
pub const ADDRESS_VOID: &str = "the-void";

/// Number of parent/rank slots held by a single forest page.
///
/// The forest grows one page at a time, so this is also the growth increment.
pub const FOREST_PAGE_SLOTS: u64 = 100_000;

/// Encoded width of one forest slot: 8 bytes of parent plus 1 byte of rank.
pub const FOREST_SLOT_BYTES: u64 = 9;

/// Default number of clean forest pages kept in memory (about 230 MB).
pub const DEFAULT_MAX_RESIDENT_PAGES: usize = 256;

/// Default number of block heights fetched and clustered per batch.
pub const DEFAULT_BATCH_BLOCKS: u64 = 1_000;

/// Default block-height milestone at which progress is reported.
pub const DEFAULT_CHECKPOINT_INTERVAL_BLOCKS: u64 = 10_000;

/// Default number of exported addresses between flushes of generated labels.
pub const DEFAULT_EXPORT_FLUSH_EVERY: u64 = 100_000;

/// Prefix of labels generated for clusters that carry no external label.
pub const SYNTHETIC_LABEL_PREFIX: &str = "Wallet-";

/// Returns true for the sentinel addresses that never take part in clustering.
///
/// # Examples
///
/// ```
/// use cairn_core::constants::is_sentinel;
/// assert!(is_sentinel("Unknown"));
/// assert!(is_sentinel("the-void"));
/// assert!(!is_sentinel("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"));
/// ```
pub fn is_sentinel(address: &str) -> bool {
    matches!(address, ADDRESS_UNKNOWN | ADDRESS_FEE | ADDRESS_VOID)
}
