//! # Compaction Candidate Selection
//!
//! Estimates which sorted tables are the most profitable compaction
//! targets. Nothing here rewrites a table; the output is a ranked list.
//!
//! ## Overlap accumulation
//!
//! A compaction of table `T` has to read every table whose key range
//! overlaps `T`. [`accumulate`] sweeps the registry in min-key order and
//! folds the counts of each later-overlapping table into `T`, so that
//! `T.total_count()` approximates the volume a compaction of `T` would
//! touch. Propagation is forward only: a table never receives counts from
//! a table that started before it.
//!
//! ## Ranking
//!
//! [`select_candidates`] sorts the accumulated registry by volume and
//! converts counts to megabytes using the registry's average key size:
//!
//! ```text
//! working_set_mb = total_count     * average_key_size / MiB
//! reclaim_mb     = tombstone_count * average_key_size / MiB
//! ```
//!
//! A table qualifies iff `reclaim_mb > min_reclaim_mb` and
//! `working_set_mb < max_working_set_mb`. The walk stops after `top_n`
//! qualifying tables.
//!
//! ## Lifecycle
//!
//! ```text
//! Registry::sort_by_min_key  →  accumulate (once)  →  select_candidates
//! ```

#[cfg(test)]
mod tests;

pub mod overlap;
pub mod ranker;

pub use overlap::{OverlapStats, accumulate};
pub use ranker::{Candidate, MIB, SelectionPolicy, estimate_mb, select_candidates};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned when a compaction phase is driven out of order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompactionError {
    /// Accumulation needs the registry in ascending min-key order.
    #[error("registry is not sorted by min key")]
    NotSortedByMinKey,

    /// Accumulated counts would be folded in a second time.
    #[error("overlap accumulation has already run on this registry")]
    AlreadyAccumulated,

    /// Ranking needs [`Registry::compute_average_key_size`](crate::registry::Registry::compute_average_key_size).
    #[error("average key size has not been computed")]
    AverageKeySizeUnknown,
}
