//! Overlap accumulation: a sweep line over tables sorted by min key.
//!
//! The sweep keeps an *active window* of earlier tables whose range may
//! still reach the current one. For each table `C`, in min-key order:
//!
//! 1. **Evict** every active table with `max_key < C.min_key`. Later tables
//!    start at or after `C.min_key`, so an evicted table can never overlap
//!    again.
//! 2. **Propagate** `C`'s own live and tombstone counts into every table
//!    still active. Each of them starts at or before `C` and ends at or
//!    after `C.min_key`.
//! 3. **Admit** `C` with its position as `sequence_index`.
//!
//! Window entries refer back into the registry by index; they carry only
//! the `max_key` needed for eviction.
//!
//! Each table is admitted once and evicted at most once. Propagation costs
//! O(window) per step, so a registry of mutually overlapping tables is
//! quadratic.

use tracing::{debug, info, trace};

use crate::registry::{Registry, SortPolicy};

use super::CompactionError;

/// Summary of one accumulation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlapStats {
    /// Tables swept.
    pub tables: usize,

    /// `(earlier, later)` pairs whose counts were folded together.
    pub propagations: u64,

    /// Window entries dropped because their range ended.
    pub evictions: u64,

    /// Largest window size seen before admitting a table.
    pub max_window: usize,
}

/// One table still in the active window.
struct ActiveEntry {
    /// Index into the registry (equal to the table's `sequence_index`).
    sequence_index: usize,
    max_key: Vec<u8>,
}

/// Folds the counts of each table into every earlier table it overlaps.
///
/// Each table's own counts are read before any later table can change
/// them, so only original counts are ever propagated. Aggregate
/// registry totals are left untouched.
///
/// # Errors
///
/// - [`CompactionError::NotSortedByMinKey`] unless the registry's last
///   ordering was [`SortPolicy::MinKey`].
/// - [`CompactionError::AlreadyAccumulated`] on a second call.
pub fn accumulate(registry: &mut Registry) -> Result<OverlapStats, CompactionError> {
    if registry.is_accumulated() {
        return Err(CompactionError::AlreadyAccumulated);
    }
    if registry.order() != Some(SortPolicy::MinKey) {
        return Err(CompactionError::NotSortedByMinKey);
    }

    let tables = registry.tables_mut();
    let mut active: Vec<ActiveEntry> = Vec::new();
    let mut stats = OverlapStats {
        tables: tables.len(),
        ..OverlapStats::default()
    };

    for i in 0..tables.len() {
        let (earlier, rest) = tables.split_at_mut(i);
        let current = &mut rest[0];

        // 1. Evict
        let before = active.len();
        active.retain(|e| e.max_key >= current.min_key);
        stats.evictions += (before - active.len()) as u64;
        stats.max_window = stats.max_window.max(active.len());

        // 2. Propagate. `current` still holds its own counts: only later
        // tables propagate into it.
        for entry in &active {
            let target = &mut earlier[entry.sequence_index];
            target.live_count = target.live_count.saturating_add(current.live_count);
            target.tombstone_count = target
                .tombstone_count
                .saturating_add(current.tombstone_count);
            trace!(
                from = %current.identifier,
                into = %target.identifier,
                "propagated overlap counts"
            );
        }
        stats.propagations += active.len() as u64;

        // 3. Admit
        current.sequence_index = Some(i);
        active.push(ActiveEntry {
            sequence_index: i,
            max_key: current.max_key.clone(),
        });
    }

    registry.mark_accumulated();

    info!(
        tables = stats.tables,
        propagations = stats.propagations,
        evictions = stats.evictions,
        max_window = stats.max_window,
        "overlap accumulation complete"
    );
    for table in registry.tables() {
        debug!(
            table = %table.identifier,
            live = table.live_count,
            tombstones = table.tombstone_count,
            "accumulated counts"
        );
    }

    Ok(stats)
}
