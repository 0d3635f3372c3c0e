//! LevelDB sorted-table reader.
//!
//! Reads the immutable `.ldb` / `.sst` files produced by LevelDB and walks
//! every entry in key order. Only what the analyzer needs is implemented:
//! the footer, the index block and the data blocks. Filter and meta blocks
//! are located but never interpreted.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA_BLOCK][TRAILER] × N
//! [META_BLOCK][TRAILER] × M        (filters, stats; ignored)
//! [METAINDEX_BLOCK][TRAILER]
//! [INDEX_BLOCK][TRAILER]
//! [FOOTER 48B]
//! ```
//!
//! - **Trailer**: `[compression type: u8][masked crc32c: fixed32]`. The CRC
//!   covers the (possibly compressed) block contents and the type byte.
//! - **Footer**: metaindex handle and index handle (two varint64 each),
//!   zero padding up to 40 bytes, then the fixed64 magic number.
//! - **Index block**: one entry per data block; the key is ≥ every key in
//!   that block, the value is the encoded [`BlockHandle`].
//!
//! # Sub-modules
//!
//! - [`block`]: [`BlockIterator`] over the prefix-compressed entries of one block.
//! - [`builder`]: [`TableBuilder`] writing tables in the same format.
//!
//! # Concurrency model
//!
//! A [`Table`] is a read-only memory map of a file that the engine never
//! rewrites, so it can be iterated repeatedly without locking.

pub mod block;
pub mod builder;


pub use block::{BlockEntry, BlockIterator};
pub use builder::{TableBuilder, internal_key};

use std::{fs::File, io, path::Path};

use crate::encoding::{self, Decode, Encode, EncodingError, Varint64};
use crc::{CRC_32_ISCSI, Crc};
use memmap2::Mmap;
use thiserror::Error;
use tracing::trace;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic number closing every table file.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Encoded footer size: two padded handles plus the magic number.
pub const FOOTER_SIZE: usize = 48;

/// Size of the per-block trailer (type byte + crc32c).
pub const BLOCK_TRAILER_SIZE: usize = 5;

const FOOTER_HANDLES_SIZE: usize = 40;
const CRC_MASK_DELTA: u32 = 0xa282_ead8;

pub(crate) const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned while opening or iterating a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A length or varint could not be decoded.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Stored block checksum disagrees with the contents.
    #[error("Checksum mismatch in block at offset {offset}: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// File offset of the block.
        offset: u64,
        /// Checksum recorded in the trailer (unmasked).
        expected: u32,
        /// Checksum computed over the block.
        actual: u32,
    },

    /// Structural damage: bad magic, malformed block, undecodable payload.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The file ends before a structure it references.
    #[error("Truncated table: {0}")]
    Truncated(String),

    /// Block compressed with a codec this reader does not know.
    #[error("Unsupported compression type {0}")]
    UnsupportedCompression(u8),

    /// Caller misuse of the table builder.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

// ------------------------------------------------------------------------------------------------
// Compression
// ------------------------------------------------------------------------------------------------

/// Block compression codecs of the table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// Stored as-is.
    None = 0,
    /// Raw snappy.
    Snappy = 1,
    /// Zstandard frame.
    Zstd = 2,
}

impl CompressionType {
    /// Maps the trailer type byte to a codec.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Snappy),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Trailer type byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// ------------------------------------------------------------------------------------------------
// Checksums
// ------------------------------------------------------------------------------------------------

/// CRC32C of a block's contents followed by its type byte.
pub(crate) fn block_crc(contents: &[u8], block_type: u8) -> u32 {
    let mut digest = CASTAGNOLI.digest();
    digest.update(contents);
    digest.update(&[block_type]);
    digest.finalize()
}

/// Stored CRCs are rotated and offset so that a CRC of data containing
/// embedded CRCs does not degenerate.
pub(crate) fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(CRC_MASK_DELTA)
}

pub(crate) fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(CRC_MASK_DELTA).rotate_left(15)
}

// ------------------------------------------------------------------------------------------------
// Block handle & footer
// ------------------------------------------------------------------------------------------------

/// Location of a block in the file, excluding its trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// Offset of the first byte of the block.
    pub offset: u64,

    /// Size of the block contents in bytes.
    pub size: u64,
}

impl Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        Varint64(self.offset).encode_to(buf)?;
        Varint64(self.size).encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (Varint64(offset), n) = Varint64::decode_from(&buf[off..])?;
        off += n;
        let (Varint64(size), n) = Varint64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

/// Fixed-size trailer at the very end of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Handle of the metaindex block.
    pub metaindex: BlockHandle,

    /// Handle of the index block.
    pub index: BlockHandle,
}

impl Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let start = buf.len();
        self.metaindex.encode_to(buf)?;
        self.index.encode_to(buf)?;
        buf.resize(start + FOOTER_HANDLES_SIZE, 0);
        TABLE_MAGIC.encode_to(buf)?;
        Ok(())
    }
}

impl Footer {
    /// Decodes the last [`FOOTER_SIZE`] bytes of a table.
    fn parse(buf: &[u8]) -> Result<Self, TableError> {
        encoding::require(buf, FOOTER_SIZE)
            .map_err(|_| TableError::Truncated("footer shorter than 48 bytes".into()))?;
        let (magic, _) = u64::decode_from(&buf[FOOTER_HANDLES_SIZE..])?;
        if magic != TABLE_MAGIC {
            return Err(TableError::Corruption(format!(
                "bad table magic number {magic:#018x}"
            )));
        }
        let handles = &buf[..FOOTER_HANDLES_SIZE];
        let (metaindex, n) = BlockHandle::decode_from(handles)
            .map_err(|e| TableError::Corruption(format!("bad metaindex handle: {e}")))?;
        let (index, _) = BlockHandle::decode_from(&handles[n..])
            .map_err(|e| TableError::Corruption(format!("bad index handle: {e}")))?;
        Ok(Self { metaindex, index })
    }
}

// ------------------------------------------------------------------------------------------------
// Table: immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped LevelDB table.
pub struct Table {
    /// Read-only mapping of the whole file.
    mmap: Mmap,

    /// Parsed footer.
    footer: Footer,

    /// Decoded index block contents.
    index: Vec<u8>,

    /// Whether block CRCs are checked on every read.
    verify_checksums: bool,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("file_size", &self.mmap.len())
            .field("footer", &self.footer)
            .field("verify_checksums", &self.verify_checksums)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Opens a table, validates its footer and loads the index block.
    ///
    /// With `verify_checksums` set, the metaindex and index blocks are
    /// checksummed here and every data block is checksummed as the
    /// iterator reaches it.
    ///
    /// # Errors
    ///
    /// - [`TableError::Io`] if the file cannot be opened or mapped.
    /// - [`TableError::Truncated`] if the file is shorter than a footer or a
    ///   handle points past its end.
    /// - [`TableError::Corruption`] / [`TableError::ChecksumMismatch`] for
    ///   damaged footers and blocks.
    pub fn open(path: impl AsRef<Path>, verify_checksums: bool) -> Result<Self, TableError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_SIZE as u64 {
            return Err(TableError::Truncated(format!(
                "file is {file_len} bytes, smaller than the {FOOTER_SIZE}-byte footer"
            )));
        }

        // SAFETY: tables are immutable once written and the mapping is read-only.
        let mmap = unsafe { Mmap::map(&file)? };

        let footer = Footer::parse(&mmap[mmap.len() - FOOTER_SIZE..])?;
        let mut table = Self {
            mmap,
            footer,
            index: Vec::new(),
            verify_checksums,
        };

        if verify_checksums {
            table.read_block(&footer.metaindex)?;
        }
        table.index = table.read_block(&footer.index)?;

        trace!(
            file_size = table.mmap.len(),
            index_size = table.index.len(),
            "table opened"
        );
        Ok(table)
    }

    /// Size of the mapped file in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Iterates every entry of every data block in key order.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator {
            table: self,
            index_iter: BlockIterator::new(self.index.clone()),
            data_iter: None,
            failed: false,
        }
    }

    /// Reads, verifies and decompresses the block at `handle`.
    pub(crate) fn read_block(&self, handle: &BlockHandle) -> Result<Vec<u8>, TableError> {
        let start = usize::try_from(handle.offset)
            .map_err(|_| TableError::Corruption("block offset exceeds addressable range".into()))?;
        let size = usize::try_from(handle.size)
            .map_err(|_| TableError::Corruption("block size exceeds addressable range".into()))?;

        let end = start
            .checked_add(size)
            .and_then(|n| n.checked_add(BLOCK_TRAILER_SIZE))
            .ok_or_else(|| TableError::Corruption("block handle overflows".into()))?;
        if end > self.mmap.len() {
            return Err(TableError::Truncated(format!(
                "block [{start}, {end}) extends past end of file ({} bytes)",
                self.mmap.len()
            )));
        }

        let contents = &self.mmap[start..start + size];
        let block_type = self.mmap[start + size];

        if self.verify_checksums {
            let (stored, _) = u32::decode_from(&self.mmap[start + size + 1..end])?;
            let expected = unmask_crc(stored);
            let actual = block_crc(contents, block_type);
            if expected != actual {
                return Err(TableError::ChecksumMismatch {
                    offset: handle.offset,
                    expected,
                    actual,
                });
            }
        }

        match CompressionType::from_byte(block_type) {
            Some(CompressionType::None) => Ok(contents.to_vec()),
            Some(CompressionType::Snappy) => snap::raw::Decoder::new()
                .decompress_vec(contents)
                .map_err(|e| TableError::Corruption(format!("snappy block: {e}"))),
            Some(CompressionType::Zstd) => zstd::stream::decode_all(contents)
                .map_err(|e| TableError::Corruption(format!("zstd block: {e}"))),
            None => Err(TableError::UnsupportedCompression(block_type)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TableIterator
// ------------------------------------------------------------------------------------------------

/// Two-level iterator: index block entries select data blocks, whose
/// entries are yielded in order.
///
/// The first error ends the iteration; later calls return `None`.
pub struct TableIterator<'a> {
    table: &'a Table,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
    failed: bool,
}

impl TableIterator<'_> {
    fn fail(&mut self, err: TableError) -> Option<Result<BlockEntry, TableError>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Result<BlockEntry, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if let Some(data_iter) = self.data_iter.as_mut() {
                match data_iter.next() {
                    Some(Ok(entry)) => return Some(Ok(entry)),
                    Some(Err(e)) => return self.fail(e),
                    None => self.data_iter = None,
                }
            }

            let index_entry = match self.index_iter.next()? {
                Ok(entry) => entry,
                Err(e) => return self.fail(e),
            };
            let handle = match BlockHandle::decode_from(&index_entry.value) {
                Ok((handle, _)) => handle,
                Err(e) => {
                    return self.fail(TableError::Corruption(format!(
                        "bad block handle in index: {e}"
                    )));
                }
            };
            match self.table.read_block(&handle) {
                Ok(contents) => self.data_iter = Some(BlockIterator::new(contents)),
                Err(e) => return self.fail(e),
            }
        }
    }
}
