//! # ldb-reclaim
//!
//! Offline compaction advisor for LevelDB-style data directories. Reads
//! every sorted table in a folder, estimates how much space a compaction
//! of each table would reclaim, and lists the most profitable targets
//! whose worst-case working set stays under a ceiling.
//!
//! The tool never writes to the data directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ldb_reclaim::{Outcome, ReclaimConfig, analyze};
//!
//! let config = ReclaimConfig {
//!     verify_checksums: true,
//!     top_n: 5,
//!     ..ReclaimConfig::default()
//! };
//! let analysis = analyze("/var/lib/app/db".as_ref(), &config).unwrap();
//!
//! for failure in &analysis.failures {
//!     eprintln!("skipped {}: {}", failure.identifier, failure.error);
//! }
//! if let Outcome::Candidates(candidates) = &analysis.outcome {
//!     for c in candidates {
//!         println!("{} reclaims ~{} MB", c.identifier, c.reclaim_mb);
//!     }
//! }
//! ```
//!
//! ## Pipeline
//!
//! 1. **Discover** `*.ldb` files ([`extract::discover_tables`]).
//! 2. **Extract** each file's key range and entry counts
//!    ([`extract::extract_table`]). Unreadable tables are skipped and
//!    reported in [`Analysis::failures`].
//! 3. **Register** the records and compute the average key size
//!    ([`registry::Registry`]).
//! 4. **Accumulate** forward-overlap counts ([`compaction::accumulate`]).
//! 5. **Rank** and select candidates ([`compaction::select_candidates`]).

pub mod compaction;
pub mod encoding;
pub mod extract;
pub mod registry;
pub mod table;

use std::{io, path::Path, path::PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use compaction::{
    Candidate, CompactionError, OverlapStats, SelectionPolicy, accumulate, select_candidates,
};
use extract::{ExtractFailure, discover_tables, extract_table};
use registry::{Registry, RegistryError, RegistryStats, TableRecord};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Options for one analysis run.
///
/// Validated by [`analyze`] and [`analyze_records`] before any work starts.
///
/// # Example
///
/// ```rust
/// use ldb_reclaim::ReclaimConfig;
///
/// let config = ReclaimConfig {
///     max_working_set_mb: 2048,
///     file_extension: "sst".into(),
///     ..ReclaimConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimConfig {
    /// Check every block CRC while reading tables.
    ///
    /// Default: false.
    pub verify_checksums: bool,

    /// Log every extracted and ranked table at `debug`.
    ///
    /// Default: false.
    pub verbose: bool,

    /// Stop after computing aggregate statistics.
    ///
    /// Default: false.
    pub dump_stats_only: bool,

    /// Maximum number of candidates reported.
    ///
    /// Default: 10. Must be ≥ 1.
    pub top_n: usize,

    /// Candidates must have a working set strictly below this, in MB.
    ///
    /// Default: 500. Must be ≥ 1.
    pub max_working_set_mb: u64,

    /// Candidates must reclaim strictly more than this, in MB.
    ///
    /// Default: 300.
    pub min_reclaim_mb: u64,

    /// Suffix of table files, without the dot.
    ///
    /// Default: `"ldb"`. Must be non-empty.
    pub file_extension: String,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        let policy = SelectionPolicy::default();
        Self {
            verify_checksums: false,
            verbose: false,
            dump_stats_only: false,
            top_n: policy.top_n,
            max_working_set_mb: policy.max_working_set_mb,
            min_reclaim_mb: policy.min_reclaim_mb,
            file_extension: "ldb".into(),
        }
    }
}

impl ReclaimConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), ReclaimError> {
        if self.top_n < 1 {
            return Err(ReclaimError::InvalidConfig("top_n must be >= 1".into()));
        }
        if self.max_working_set_mb < 1 {
            return Err(ReclaimError::InvalidConfig(
                "max_working_set_mb must be >= 1".into(),
            ));
        }
        if self.file_extension.is_empty() {
            return Err(ReclaimError::InvalidConfig(
                "file_extension must not be empty".into(),
            ));
        }
        if self.file_extension.starts_with('.') {
            return Err(ReclaimError::InvalidConfig(
                "file_extension must not start with '.'".into(),
            ));
        }
        Ok(())
    }

    /// The ranking thresholds of this configuration.
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            top_n: self.top_n,
            max_working_set_mb: self.max_working_set_mb,
            min_reclaim_mb: self.min_reclaim_mb,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Fatal errors that end a run. Per-table failures are not among them;
/// see [`Analysis::failures`].
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The data directory could not be listed.
    #[error("cannot read directory {}: {source}", .path.display())]
    Directory {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Error from the table registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A compaction phase was driven out of order.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),
}

// ------------------------------------------------------------------------------------------------
// Analysis result
// ------------------------------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No table held any key; nothing was ranked.
    NoData,

    /// Statistics were computed and the run stopped as requested.
    StatsOnly,

    /// Ranked candidates, best first. May be empty.
    Candidates(Vec<Candidate>),
}

/// Everything a run produced.
#[derive(Debug)]
pub struct Analysis {
    /// The registry after the last phase that ran.
    pub registry: Registry,

    /// Aggregate totals over the extracted tables.
    pub stats: RegistryStats,

    /// Tables that could not be extracted, in discovery order.
    pub failures: Vec<ExtractFailure>,

    /// Terminal state of the run.
    pub outcome: Outcome,

    /// Sweep statistics, when accumulation ran.
    pub overlap: Option<OverlapStats>,
}

impl Analysis {
    /// Selected candidates, or an empty slice if ranking did not run.
    pub fn candidates(&self) -> &[Candidate] {
        match &self.outcome {
            Outcome::Candidates(c) => c.as_slice(),
            _ => &[],
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Pipeline
// ------------------------------------------------------------------------------------------------

/// Analyzes every table in `dir`.
///
/// # Errors
///
/// - [`ReclaimError::InvalidConfig`] before anything is read.
/// - [`ReclaimError::Directory`] if `dir` cannot be listed.
///
/// Unreadable tables are not errors; they are logged at `warn` and listed
/// in [`Analysis::failures`].
pub fn analyze(dir: &Path, config: &ReclaimConfig) -> Result<Analysis, ReclaimError> {
    config.validate()?;

    let paths =
        discover_tables(dir, &config.file_extension).map_err(|source| ReclaimError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
    info!(dir = %dir.display(), tables = paths.len(), "analysis starting");

    let mut records = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    for path in &paths {
        match extract_table(path, config.verify_checksums) {
            Ok(record) => records.push(record),
            Err(error) => {
                let identifier = extract::file_name(path);
                warn!(table = %identifier, kind = ?error.kind(), %error, "skipping table");
                failures.push(ExtractFailure { identifier, error });
            }
        }
    }

    let mut analysis = analyze_records(records, config)?;
    analysis.failures = failures;
    Ok(analysis)
}

/// Runs registration, accumulation and ranking over already-extracted
/// records.
///
/// # Errors
///
/// [`ReclaimError::InvalidConfig`] for a bad configuration.
pub fn analyze_records(
    records: impl IntoIterator<Item = TableRecord>,
    config: &ReclaimConfig,
) -> Result<Analysis, ReclaimError> {
    config.validate()?;

    let mut registry = Registry::new();
    for record in records {
        registry.add(record);
    }

    let mut analysis = Analysis {
        stats: registry.stats(),
        registry,
        failures: Vec::new(),
        outcome: Outcome::NoData,
        overlap: None,
    };

    if analysis.stats.total_keys == 0 {
        info!(tables = analysis.stats.table_count, "no keys found, nothing to rank");
        return Ok(analysis);
    }

    analysis.registry.compute_average_key_size()?;
    analysis.stats = analysis.registry.stats();
    info!(
        tables = analysis.stats.table_count,
        total_size = analysis.stats.total_size,
        total_keys = analysis.stats.total_keys,
        total_tombstones = analysis.stats.total_tombstones,
        average_key_size = ?analysis.stats.average_key_size,
        "registry built"
    );

    if config.dump_stats_only {
        analysis.outcome = Outcome::StatsOnly;
        return Ok(analysis);
    }

    analysis.registry.sort_by_min_key();
    analysis.overlap = Some(accumulate(&mut analysis.registry)?);
    let candidates = select_candidates(&mut analysis.registry, &config.selection_policy())?;
    analysis.outcome = Outcome::Candidates(candidates);
    Ok(analysis)
}
