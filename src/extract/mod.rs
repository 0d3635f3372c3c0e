//! # Table Metadata Extraction
//!
//! Turns one sorted-table file into a [`TableRecord`]: its key range and
//! how many of its entries are live or tombstones.
//!
//! ## Internal keys
//!
//! Every raw key stored in a table ends in an 8-byte marker:
//!
//! ```text
//! [USER_KEY …][SEPARATOR?…][KIND: u8][SEQUENCE: 7 bytes]   (marker is fixed64 LE)
//! ```
//!
//! A kind of `0` is a tombstone; any other kind is a live entry. The user
//! key is the prefix of the bytes before the marker up to the first
//! separator byte (`0` for tombstones, `1` for live entries), or all of
//! them if no separator occurs.
//!
//! ## Failure policy
//!
//! A file that cannot be read is reported as an [`ExtractError`] and the
//! caller moves on; one bad table never aborts a run.


use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::registry::TableRecord;
use crate::table::{Table, TableError};

/// Length of the sequence/kind marker that ends every raw key.
pub const MARKER_LEN: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error types
// ------------------------------------------------------------------------------------------------

/// Coarse classification of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractFailureKind {
    /// The file could not be opened, stat'ed or mapped.
    Open,

    /// The file is not a well-formed table, or a checksum failed.
    Format,

    /// The file ends before the data it references.
    Truncated,
}

/// Why a single table could not be extracted.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Opening or mapping the file failed.
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file content is malformed.
    #[error("format error: {0}")]
    Format(String),

    /// A block checksum did not match.
    #[error("checksum error: {0}")]
    Checksum(String),

    /// The file is shorter than its own structure requires.
    #[error("truncated: {0}")]
    Truncated(String),
}

impl ExtractError {
    /// The failure class, with checksum errors folded into [`ExtractFailureKind::Format`].
    pub fn kind(&self) -> ExtractFailureKind {
        match self {
            Self::Open { .. } => ExtractFailureKind::Open,
            Self::Format(_) | Self::Checksum(_) => ExtractFailureKind::Format,
            Self::Truncated(_) => ExtractFailureKind::Truncated,
        }
    }

    fn from_table(path: &Path, err: TableError) -> Self {
        match err {
            TableError::Io(source) => Self::Open {
                path: path.to_path_buf(),
                source,
            },
            TableError::Encoding(e) if e.is_eof() => Self::Truncated(e.to_string()),
            TableError::Truncated(msg) => Self::Truncated(msg),
            e @ TableError::ChecksumMismatch { .. } => Self::Checksum(e.to_string()),
            e => Self::Format(e.to_string()),
        }
    }
}

/// A table that was skipped, keyed by file name.
#[derive(Debug)]
pub struct ExtractFailure {
    /// File name of the skipped table.
    pub identifier: String,

    /// What went wrong.
    pub error: ExtractError,
}

// ------------------------------------------------------------------------------------------------
// Internal key parsing
// ------------------------------------------------------------------------------------------------

/// Kind of a table entry, decoded from its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A deletion marker (kind byte `0`).
    Tombstone,

    /// Any other kind byte.
    Live,
}

impl EntryKind {
    /// Byte that terminates the user key for this kind.
    pub fn separator(self) -> u8 {
        match self {
            Self::Tombstone => 0,
            Self::Live => 1,
        }
    }
}

/// A raw key split into user key and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    /// Key bytes as the application wrote them.
    pub user_key: &'a [u8],

    /// Live entry or tombstone.
    pub kind: EntryKind,
}

/// Splits a raw table key into its user key and kind.
///
/// # Errors
///
/// [`ExtractError::Format`] if the key is shorter than the 8-byte marker.
pub fn parse_internal_key(raw: &[u8]) -> Result<ParsedKey<'_>, ExtractError> {
    let Some(body_len) = raw.len().checked_sub(MARKER_LEN) else {
        return Err(ExtractError::Format(format!(
            "{}-byte key is shorter than the {MARKER_LEN}-byte marker",
            raw.len()
        )));
    };
    let body = &raw[..body_len];
    let kind = match raw[body_len] {
        0 => EntryKind::Tombstone,
        _ => EntryKind::Live,
    };
    let separator = kind.separator();
    let end = body.iter().position(|&b| b == separator).unwrap_or(body.len());
    Ok(ParsedKey {
        user_key: &body[..end],
        kind,
    })
}

// ------------------------------------------------------------------------------------------------
// Extraction
// ------------------------------------------------------------------------------------------------

/// Reads every entry of the table at `path` and summarises it.
///
/// The identifier is the file name. The size is the length of the mapped
/// file, following symlinks. A table without entries yields empty
/// keys and zero counts.
///
/// # Errors
///
/// Any [`ExtractError`]; see [`ExtractError::kind`] for the classes.
pub fn extract_table(path: &Path, verify_checksums: bool) -> Result<TableRecord, ExtractError> {
    let identifier = file_name(path);
    let table = Table::open(path, verify_checksums).map_err(|e| ExtractError::from_table(path, e))?;
    let size_bytes = table.file_size();

    let mut min_key: Option<Vec<u8>> = None;
    let mut last_raw: Option<Vec<u8>> = None;
    let mut live_count = 0u64;
    let mut tombstone_count = 0u64;

    for entry in table.iter() {
        let entry = entry.map_err(|e| ExtractError::from_table(path, e))?;
        let parsed = parse_internal_key(&entry.key)?;
        match parsed.kind {
            EntryKind::Tombstone => tombstone_count += 1,
            EntryKind::Live => live_count += 1,
        }
        if min_key.is_none() {
            min_key = Some(parsed.user_key.to_vec());
        }
        last_raw = Some(entry.key);
    }

    let max_key = match &last_raw {
        Some(raw) => parse_internal_key(raw)?.user_key.to_vec(),
        None => Vec::new(),
    };
    let record = TableRecord::new(
        identifier,
        size_bytes,
        min_key.unwrap_or_default(),
        max_key,
        live_count,
        tombstone_count,
    );

    debug!(
        table = %record.identifier,
        size = record.size_bytes,
        min_key = %record.min_key.escape_ascii(),
        max_key = %record.max_key.escape_ascii(),
        live = record.live_count,
        tombstones = record.tombstone_count,
        "table extracted"
    );
    Ok(record)
}

/// Lists the files in `dir` named `*.<extension>`, sorted by file name.
///
/// Directories are skipped; symlinks to files are included.
///
/// # Errors
///
/// I/O errors from reading the directory itself.
pub fn discover_tables(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let suffix = format!(".{extension}");
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&suffix));
        if matches && path.is_file() {
            paths.push(path);
        } else {
            trace!(path = %path.display(), "skipping non-table entry");
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!(dir = %dir.display(), count = paths.len(), "tables discovered");
    Ok(paths)
}

/// The file name of `path` as a string, or the whole path if it has none.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
