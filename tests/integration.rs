//! Integration tests for the public analysis API.
//!
//! Every test builds a throwaway data directory with [`TableBuilder`] and
//! runs [`analyze`] over it, using only the `ldb_reclaim` public surface.
//!
//! ## Coverage areas
//! - **Fatal errors**: invalid config, unreadable directory
//! - **Empty input**: no tables, only empty tables, only broken tables
//! - **Partial failure**: broken tables are skipped and reported
//! - **Stats only**: aggregate totals without ranking
//! - **Selection**: end-to-end candidates from real files
//! - **Overlap**: accumulated counts visible in the returned registry

use std::{fs, path::Path};

use ldb_reclaim::{
    Outcome, ReclaimConfig, ReclaimError, analyze, analyze_records,
    extract::ExtractFailureKind,
    registry::TableRecord,
    table::{TableBuilder, internal_key},
};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Writes a table of `count` keys `<prefix><i:05>`; every `tomb_every`-th
/// entry (starting at 0) is a tombstone, `0` means none.
fn write_table(
    dir: &Path,
    name: &str,
    prefix: &str,
    count: usize,
    tomb_every: usize,
    value_len: usize,
) {
    let entries = (0..count).map(move |i| {
        let user_key = format!("{prefix}{i:05}");
        let kind = u8::from(tomb_every == 0 || i % tomb_every != 0);
        let value = if kind == 0 { Vec::new() } else { vec![0x5A; value_len] };
        (internal_key(user_key.as_bytes(), (count - i) as u64, kind), value)
    });
    TableBuilder::new(dir.join(name)).build(entries).unwrap();
}

fn identifiers(records: &[TableRecord]) -> Vec<&str> {
    records.iter().map(|t| t.identifier.as_str()).collect()
}

// ================================================================================================
// Fatal errors
// ================================================================================================

/// # Scenario
/// The folder argument names a directory that does not exist.
///
/// # Expected behavior
/// `analyze` fails with `ReclaimError::Directory` before reading anything.
#[test]
fn missing_directory_is_fatal() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let err = analyze(&tmp.path().join("nope"), &ReclaimConfig::default()).unwrap_err();
    assert!(matches!(err, ReclaimError::Directory { .. }), "{err}");
}

#[test]
fn invalid_config_is_rejected_before_discovery() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope");

    for config in [
        ReclaimConfig {
            top_n: 0,
            ..ReclaimConfig::default()
        },
        ReclaimConfig {
            max_working_set_mb: 0,
            ..ReclaimConfig::default()
        },
        ReclaimConfig {
            file_extension: String::new(),
            ..ReclaimConfig::default()
        },
        ReclaimConfig {
            file_extension: ".ldb".into(),
            ..ReclaimConfig::default()
        },
    ] {
        let err = analyze(&missing, &config).unwrap_err();
        assert!(matches!(err, ReclaimError::InvalidConfig(_)), "{err}");
        assert!(matches!(
            analyze_records(Vec::new(), &config),
            Err(ReclaimError::InvalidConfig(_))
        ));
    }
}

#[test]
fn default_config_is_valid() {
    let config = ReclaimConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.top_n, 10);
    assert_eq!(config.max_working_set_mb, 500);
    assert_eq!(config.min_reclaim_mb, 300);
    assert_eq!(config.file_extension, "ldb");
    assert!(!config.verify_checksums && !config.verbose && !config.dump_stats_only);
}

// ================================================================================================
// Empty input
// ================================================================================================

/// # Scenario
/// Zero tables discovered.
///
/// # Expected behavior
/// The run ends cleanly with `Outcome::NoData` and no average key size.
#[test]
fn empty_directory_has_no_data() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("LOG"), b"log text").unwrap();

    let analysis = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();

    assert_eq!(analysis.outcome, Outcome::NoData);
    assert!(analysis.candidates().is_empty());
    assert!(analysis.failures.is_empty());
    assert_eq!(analysis.stats.table_count, 0);
    assert_eq!(analysis.stats.average_key_size, None);
    assert_eq!(analysis.overlap, None);
}

#[test]
fn tables_without_keys_have_no_data() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.ldb", "k", 0, 0, 0);
    write_table(tmp.path(), "000002.ldb", "k", 0, 0, 0);

    let analysis = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();

    assert_eq!(analysis.outcome, Outcome::NoData);
    assert_eq!(analysis.stats.table_count, 2);
    assert_eq!(analysis.stats.total_keys, 0);
    assert!(analysis.stats.total_size > 0);
}

// ================================================================================================
// Partial failure
// ================================================================================================

/// # Scenario
/// A directory mixes valid tables with a truncated and a garbage file.
///
/// # Expected behavior
/// - Broken files are listed in `failures` with their failure kind.
/// - The valid tables are still registered and ranked.
#[test]
fn broken_tables_are_skipped() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.ldb", "a", 20, 2, 16);
    write_table(tmp.path(), "000004.ldb", "b", 20, 0, 16);
    fs::write(tmp.path().join("000002.ldb"), b"short").unwrap();
    fs::write(tmp.path().join("000003.ldb"), vec![0x11; 256]).unwrap();

    let analysis = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();

    let failed: Vec<_> = analysis
        .failures
        .iter()
        .map(|f| (f.identifier.as_str(), f.error.kind()))
        .collect();
    assert_eq!(
        failed,
        [
            ("000002.ldb", ExtractFailureKind::Truncated),
            ("000003.ldb", ExtractFailureKind::Format),
        ]
    );
    assert_eq!(analysis.stats.table_count, 2);
    assert_eq!(analysis.stats.total_keys, 40);
    assert_eq!(analysis.stats.total_tombstones, 10);
    assert!(matches!(analysis.outcome, Outcome::Candidates(_)));
}

#[test]
fn only_broken_tables_is_no_data() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("000001.ldb"), b"").unwrap();

    let analysis = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();

    assert_eq!(analysis.outcome, Outcome::NoData);
    assert_eq!(analysis.failures.len(), 1);
    assert_eq!(analysis.stats.table_count, 0);
}

#[test]
fn corrupt_block_is_skipped_only_when_verifying() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.ldb", "key", 50, 5, 32);
    let path = tmp.path().join("000001.ldb");
    let mut bytes = fs::read(&path).unwrap();
    // Inside the value of the second entry of the only data block.
    bytes[40] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let lenient = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();
    assert!(lenient.failures.is_empty());
    assert_eq!(lenient.stats.total_keys, 50);

    let strict = ReclaimConfig {
        verify_checksums: true,
        ..ReclaimConfig::default()
    };
    let analysis = analyze(tmp.path(), &strict).unwrap();
    assert_eq!(analysis.failures.len(), 1);
    assert_eq!(analysis.failures[0].error.kind(), ExtractFailureKind::Format);
    assert_eq!(analysis.outcome, Outcome::NoData);
}

// ================================================================================================
// Stats only
// ================================================================================================

#[test]
fn stats_only_stops_before_ranking() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.ldb", "a", 30, 3, 8);
    write_table(tmp.path(), "000002.ldb", "a", 10, 0, 8);

    let config = ReclaimConfig {
        dump_stats_only: true,
        ..ReclaimConfig::default()
    };
    let analysis = analyze(tmp.path(), &config).unwrap();

    assert_eq!(analysis.outcome, Outcome::StatsOnly);
    assert_eq!(analysis.overlap, None);
    let stats = analysis.stats;
    assert_eq!(stats.table_count, 2);
    assert_eq!(stats.total_keys, 40);
    assert_eq!(stats.total_tombstones, 10);
    assert_eq!(stats.average_key_size, Some(stats.total_size / 40));
    assert!(!analysis.registry.is_accumulated());
}

// ================================================================================================
// Selection
// ================================================================================================

/// # Scenario
/// One table of large tombstoned entries next to small live tables.
///
/// # Starting environment
/// - `000001.ldb`: 600 entries, all tombstones, but the average key size
///   is dominated by the 4 KiB values of `000002.ldb`.
/// - `000002.ldb`: 600 live entries with 4 KiB values.
/// - `000003.ldb`: 10 live entries.
///
/// # Expected behavior
/// With `min_reclaim_mb = 0`, only the tombstone-heavy table reclaims at
/// least one megabyte and is selected.
#[test]
fn selects_tombstone_heavy_table() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.ldb", "del", 600, 1, 0);
    write_table(tmp.path(), "000002.ldb", "val", 600, 0, 4096);
    write_table(tmp.path(), "000003.ldb", "zzz", 10, 0, 8);

    let config = ReclaimConfig {
        min_reclaim_mb: 0,
        ..ReclaimConfig::default()
    };
    let analysis = analyze(tmp.path(), &config).unwrap();

    let candidates = analysis.candidates();
    assert_eq!(candidates.len(), 1, "{candidates:?}");
    let c = &candidates[0];
    assert_eq!(c.identifier, "000001.ldb");
    assert_eq!(c.tombstone_count, 600);
    assert_eq!(c.live_count, 0);
    assert_eq!(c.min_key, b"del00000");
    assert_eq!(c.max_key, b"del00599");
    assert!(c.reclaim_mb >= 1);
    assert!(c.working_set_mb < config.max_working_set_mb);

    let overlap = analysis.overlap.unwrap();
    assert_eq!(overlap.tables, 3);
    assert_eq!(overlap.propagations, 0);
}

#[test]
fn default_thresholds_select_nothing_from_small_tables() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.ldb", "a", 100, 2, 64);

    let analysis = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();
    assert_eq!(analysis.outcome, Outcome::Candidates(Vec::new()));
}

#[test]
fn other_extensions_are_ignored_unless_configured() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000001.sst", "a", 10, 2, 8);

    let default = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();
    assert_eq!(default.stats.table_count, 0);

    let config = ReclaimConfig {
        file_extension: "sst".into(),
        ..ReclaimConfig::default()
    };
    let sst = analyze(tmp.path(), &config).unwrap();
    assert_eq!(sst.stats.table_count, 1);
    assert_eq!(sst.stats.total_tombstones, 5);
}

// ================================================================================================
// Overlap
// ================================================================================================

/// # Scenario
/// Table `000002.ldb` spans `k00000..k00099`; `000001.ldb` holds
/// `k000100000..k000100009`, which sorts entirely inside that range.
///
/// # Expected behavior
/// The wide table absorbs the narrow one; the narrow one is unchanged.
#[test]
fn containment_is_visible_in_registry() {
    let tmp = TempDir::new().unwrap();
    write_table(tmp.path(), "000002.ldb", "k", 100, 4, 8);
    write_table(tmp.path(), "000001.ldb", "k0001", 10, 2, 8);

    let analysis = analyze(tmp.path(), &ReclaimConfig::default()).unwrap();
    let tables = analysis.registry.tables();
    assert_eq!(identifiers(tables), ["000002.ldb", "000001.ldb"]);

    let wide = &tables[0];
    assert_eq!((wide.live_count, wide.tombstone_count), (75 + 5, 25 + 5));
    let narrow = &tables[1];
    assert_eq!((narrow.live_count, narrow.tombstone_count), (5, 5));
    assert_eq!(analysis.stats.total_keys, 110);
}

#[test]
fn records_can_be_analyzed_without_files() {
    let records = [
        ("f1", "a", "d"),
        ("f2", "e", "h"),
        ("f3", "i", "l"),
        ("f4", "m", "q"),
        ("f5", "c", "k"),
    ]
    .map(|(id, min, max)| TableRecord::new(id, 42, min, max, 5, 5));

    let analysis = analyze_records(records, &ReclaimConfig::default()).unwrap();

    assert_eq!(analysis.stats.average_key_size, Some(4));
    assert_eq!(analysis.outcome, Outcome::Candidates(Vec::new()));
    assert_eq!(
        identifiers(analysis.registry.tables()),
        ["f5", "f1", "f2", "f3", "f4"]
    );
}
