//! # Table Registry
//!
//! Append-only, index-stable collection of [`TableRecord`]s together with
//! running aggregate totals. One registry is owned by each analysis run and
//! passed by reference to the accumulation and ranking phases.
//!
//! ## Lifecycle of a record
//!
//! 1. Created by extraction and appended with [`Registry::add`].
//! 2. Reordered by [`Registry::sort_by_min_key`].
//! 3. Mutated exactly once, in place, by the overlap accumulator
//!    ([`crate::compaction::accumulate`]). After that, `live_count` and
//!    `tombstone_count` include contributions from later-overlapping
//!    tables and no longer describe the table alone.
//! 4. Reordered (never mutated) by the ranker.
//!
//! ## Orderings
//!
//! Only two orderings are ever needed, so they are named policies
//! ([`SortPolicy`]) rather than arbitrary comparators. Both sorts are
//! stable: ties keep their current relative order.


use std::cmp::Ordering;

use thiserror::Error;
use tracing::debug;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry holds no keys, so no average key size exists.
    #[error("no data: registry holds {tables} table(s) with zero keys")]
    NoData {
        /// Number of (empty) tables registered.
        tables: u64,
    },
}

// ------------------------------------------------------------------------------------------------
// TableRecord
// ------------------------------------------------------------------------------------------------

/// Metadata of one sorted-table file.
///
/// The key range is `[min_key, max_key]`, inclusive, under byte order.
/// A table with no entries has empty keys and zero counts; it is legal and
/// contributes nothing to accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    /// File name, unique within a run.
    pub identifier: String,

    /// File size in bytes.
    pub size_bytes: u64,

    /// Smallest user key in the table.
    pub min_key: Vec<u8>,

    /// Largest user key in the table.
    pub max_key: Vec<u8>,

    /// Live (non-deletion) entries.
    pub live_count: u64,

    /// Deletion entries.
    pub tombstone_count: u64,

    /// Position in min-key order, assigned once by the accumulator.
    pub(crate) sequence_index: Option<usize>,

    /// Position in insertion order, assigned by [`Registry::add`].
    pub(crate) insertion_index: usize,
}

impl TableRecord {
    /// Creates a record that has not yet taken part in accumulation.
    pub fn new(
        identifier: impl Into<String>,
        size_bytes: u64,
        min_key: impl Into<Vec<u8>>,
        max_key: impl Into<Vec<u8>>,
        live_count: u64,
        tombstone_count: u64,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            size_bytes,
            min_key: min_key.into(),
            max_key: max_key.into(),
            live_count,
            tombstone_count,
            sequence_index: None,
            insertion_index: 0,
        }
    }

    /// `live_count + tombstone_count`.
    pub fn total_count(&self) -> u64 {
        self.live_count.saturating_add(self.tombstone_count)
    }

    /// Position this record held in min-key order when it was
    /// accumulated, or `None` before accumulation.
    pub fn sequence_index(&self) -> Option<usize> {
        self.sequence_index
    }

}

// ------------------------------------------------------------------------------------------------
// SortPolicy
// ------------------------------------------------------------------------------------------------

/// The orderings a registry can be sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPolicy {
    /// Ascending by `min_key`; required before accumulation.
    MinKey,

    /// Descending by `total_count`; used for ranking.
    TotalCountDescending,
}

impl SortPolicy {
    /// Compares two records under this policy. Ties fall back to
    /// insertion order, whatever order the records are currently in.
    pub fn compare(self, a: &TableRecord, b: &TableRecord) -> Ordering {
        let primary = match self {
            Self::MinKey => a.min_key.cmp(&b.min_key),
            Self::TotalCountDescending => b.total_count().cmp(&a.total_count()),
        };
        primary.then(a.insertion_index.cmp(&b.insertion_index))
    }
}

// ------------------------------------------------------------------------------------------------
// RegistryStats
// ------------------------------------------------------------------------------------------------

/// Aggregate totals over every record added.
///
/// Totals reflect the counts as extracted; accumulation does not change
/// them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of tables added.
    pub table_count: u64,

    /// Sum of `size_bytes`.
    pub total_size: u64,

    /// Sum of `total_count`.
    pub total_keys: u64,

    /// Sum of `tombstone_count`.
    pub total_tombstones: u64,

    /// `total_size / total_keys`, once computed.
    pub average_key_size: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------------------------------

/// Owned collection of table records for one analysis run.
#[derive(Debug, Default)]
pub struct Registry {
    tables: Vec<TableRecord>,
    stats: RegistryStats,
    order: Option<SortPolicy>,
    accumulated: bool,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and updates the aggregate totals.
    ///
    /// Any previous ordering and average key size are invalidated.
    ///
    /// Adding after [`accumulate`](crate::compaction::accumulate) leaves the
    /// registry marked as accumulated: earlier records keep their folded
    /// counts, the new one holds its own, and a second accumulation is
    /// refused. Build a fresh registry to re-run the sweep.
    pub fn add(&mut self, record: TableRecord) {
        let stats = &mut self.stats;
        stats.table_count += 1;
        stats.total_size = stats.total_size.saturating_add(record.size_bytes);
        stats.total_keys = stats.total_keys.saturating_add(record.total_count());
        stats.total_tombstones = stats.total_tombstones.saturating_add(record.tombstone_count);
        stats.average_key_size = None;

        self.tables.push(TableRecord {
            sequence_index: None,
            insertion_index: self.tables.len(),
            ..record
        });
        self.order = None;
    }

    /// Computes and stores `total_size / total_keys`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoData`] when the registry holds no keys at all
    /// (including when it holds no tables).
    pub fn compute_average_key_size(&mut self) -> Result<u64, RegistryError> {
        if self.stats.total_keys == 0 {
            return Err(RegistryError::NoData {
                tables: self.stats.table_count,
            });
        }
        let average = self.stats.total_size / self.stats.total_keys;
        self.stats.average_key_size = Some(average);
        debug!(
            total_size = self.stats.total_size,
            total_keys = self.stats.total_keys,
            average_key_size = average,
            "average key size computed"
        );
        Ok(average)
    }

    /// Stable sort ascending on `min_key`.
    pub fn sort_by_min_key(&mut self) {
        self.sort_by(SortPolicy::MinKey);
    }

    /// Stable sort descending on `total_count`.
    pub fn sort_by_total_count_descending(&mut self) {
        self.sort_by(SortPolicy::TotalCountDescending);
    }

    /// Stable sort under `policy`.
    pub fn sort_by(&mut self, policy: SortPolicy) {
        self.tables.sort_by(|a, b| policy.compare(a, b));
        self.order = Some(policy);
    }

    /// Index of the first record whose `min_key >= prefix`, or `len()` if
    /// there is none.
    ///
    /// The result is only meaningful while the registry is sorted by min
    /// key.
    pub fn find_first_starting_at_or_after(&self, prefix: &[u8]) -> usize {
        self.tables.partition_point(|t| t.min_key.as_slice() < prefix)
    }

    /// Records in their current order.
    pub fn tables(&self) -> &[TableRecord] {
        &self.tables
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no record has been added.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Current aggregate totals.
    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    /// The ordering last applied, or `None` if records are in insertion
    /// order (or were added after the last sort).
    pub fn order(&self) -> Option<SortPolicy> {
        self.order
    }

    /// Whether overlap accumulation has already run.
    pub fn is_accumulated(&self) -> bool {
        self.accumulated
    }

    pub(crate) fn tables_mut(&mut self) -> &mut [TableRecord] {
        &mut self.tables
    }

    pub(crate) fn mark_accumulated(&mut self) {
        self.accumulated = true;
    }
}
