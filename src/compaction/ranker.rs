//! Candidate ranking and selection.

use tracing::{debug, info};

use crate::registry::Registry;

use super::CompactionError;

/// Bytes per megabyte in every size estimate.
pub const MIB: u64 = 1024 * 1024;

/// Converts a key count into whole megabytes, rounding down.
pub fn estimate_mb(count: u64, average_key_size: u64) -> u64 {
    count.saturating_mul(average_key_size) / MIB
}

// ------------------------------------------------------------------------------------------------
// SelectionPolicy
// ------------------------------------------------------------------------------------------------

/// Thresholds a table must meet to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Maximum number of candidates returned.
    pub top_n: usize,

    /// Exclusive upper bound on a candidate's working set, in MB.
    pub max_working_set_mb: u64,

    /// Exclusive lower bound on a candidate's reclaimable space, in MB.
    pub min_reclaim_mb: u64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            top_n: 10,
            max_working_set_mb: 500,
            min_reclaim_mb: 300,
        }
    }
}

impl SelectionPolicy {
    /// Whether a table with these estimates qualifies.
    pub fn admits(&self, working_set_mb: u64, reclaim_mb: u64) -> bool {
        reclaim_mb > self.min_reclaim_mb && working_set_mb < self.max_working_set_mb
    }
}

// ------------------------------------------------------------------------------------------------
// Candidate
// ------------------------------------------------------------------------------------------------

/// A selected table and the estimates that qualified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// File name of the table.
    pub identifier: String,

    /// Smallest user key.
    pub min_key: Vec<u8>,

    /// Largest user key.
    pub max_key: Vec<u8>,

    /// Accumulated live entries.
    pub live_count: u64,

    /// Accumulated tombstones.
    pub tombstone_count: u64,

    /// Estimated temporary space needed to compact this table.
    pub working_set_mb: u64,

    /// Estimated space freed by dropping its tombstones.
    pub reclaim_mb: u64,
}

/// Ranks the registry by accumulated volume and returns the qualifying
/// tables, best first.
///
/// The registry is left sorted by total count, descending. The walk stops
/// as soon as `policy.top_n` tables are selected; lower-ranked tables are
/// not evaluated.
///
/// # Errors
///
/// [`CompactionError::AverageKeySizeUnknown`] if the registry's average key
/// size was never computed.
pub fn select_candidates(
    registry: &mut Registry,
    policy: &SelectionPolicy,
) -> Result<Vec<Candidate>, CompactionError> {
    let average_key_size = registry
        .stats()
        .average_key_size
        .ok_or(CompactionError::AverageKeySizeUnknown)?;

    registry.sort_by_total_count_descending();

    let mut selected = Vec::new();
    let mut visited = 0usize;
    for table in registry.tables() {
        if selected.len() >= policy.top_n {
            break;
        }
        visited += 1;

        let working_set_mb = estimate_mb(table.total_count(), average_key_size);
        let reclaim_mb = estimate_mb(table.tombstone_count, average_key_size);
        let admitted = policy.admits(working_set_mb, reclaim_mb);
        debug!(
            table = %table.identifier,
            total = table.total_count(),
            tombstones = table.tombstone_count,
            working_set_mb,
            reclaim_mb,
            admitted,
            "ranked table"
        );

        if admitted {
            selected.push(Candidate {
                identifier: table.identifier.clone(),
                min_key: table.min_key.clone(),
                max_key: table.max_key.clone(),
                live_count: table.live_count,
                tombstone_count: table.tombstone_count,
                working_set_mb,
                reclaim_mb,
            });
        }
    }

    info!(
        visited,
        selected = selected.len(),
        top_n = policy.top_n,
        max_working_set_mb = policy.max_working_set_mb,
        min_reclaim_mb = policy.min_reclaim_mb,
        "candidate selection complete"
    );
    Ok(selected)
}
