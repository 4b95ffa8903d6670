//! Restore Engine Metrics
//!
//! Counters registered on the prometheus default registry. Exposition is
//! left to the embedding process; [`gather_text`] renders the registry in
//! the text format for logs, tests or a scrape endpoint elsewhere.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

use crate::error::{Error, Result};

/// A duplicate name means two copies of this module are linked into one
/// binary; registration happens once per process at first use.
fn counter(name: &str, help: &str) -> IntCounter {
    match register_int_counter!(name, help) {
        Ok(c) => c,
        Err(e) => panic!("duplicate metric registration for {name}: {e}"),
    }
}

// =============================================================================
// Fragment Counters
// =============================================================================

pub static FRAGMENTS_REQUESTED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_fragments_requested_total",
        "Fragment fetches placed on supplier queues",
    )
});

pub static FRAGMENTS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_fragments_received_total",
        "Fragment fetches answered with data or a local copy",
    )
});

pub static FRAGMENTS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_fragments_failed_total",
        "Fragment fetches that ended in failure",
    )
});

pub static FRAGMENTS_SAVED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_fragments_saved_total",
        "Fragments written into the local store",
    )
});

pub static IDENTITY_REMATCHES: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_identity_rematches_total",
        "Fetch replies matched to their request across an identity rotation",
    )
});

// =============================================================================
// Restore Counters
// =============================================================================

pub static BLOCKS_RESTORED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_blocks_restored_total",
        "Blocks decoded, unwrapped and written to the output sink",
    )
});

pub static RESTORES_DONE: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_restores_done_total",
        "Restores that finished with every block written",
    )
});

pub static RESTORES_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_restores_failed_total",
        "Restores that gave up before the last block",
    )
});

pub static RESTORES_ABORTED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_restores_aborted_total",
        "Restores stopped from outside",
    )
});

// =============================================================================
// Decode Pool Counters
// =============================================================================

pub static DECODE_TASKS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_decode_tasks_submitted_total",
        "Tasks handed to the decode pool",
    )
});

pub static DECODE_TASKS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "shardvault_decode_tasks_failed_total",
        "Decode pool tasks that reported failure",
    )
});

/// Render the default registry in the prometheus text format.
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| Error::Internal(format!("metrics encoding failed: {e}")))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {e}")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = BLOCKS_RESTORED.get();
        BLOCKS_RESTORED.inc();
        BLOCKS_RESTORED.inc();
        assert_eq!(BLOCKS_RESTORED.get(), before + 2);
    }

    #[test]
    fn test_gather_text_lists_registered_counters() {
        FRAGMENTS_REQUESTED.inc();
        let text = gather_text().unwrap();
        assert!(text.contains("shardvault_fragments_requested_total"));
    }
}
