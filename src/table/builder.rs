//! Table writer: builds a LevelDB-format table from a sorted stream.
//!
//! The analyzer itself never writes tables; this writer produces fixtures
//! in exactly the format [`Table`](super::Table) reads, so tests and
//! benchmarks can exercise the reader end to end.
//!
//! # Input Requirements
//!
//! Entries must arrive in the engine's key order. The writer does not
//! re-check ordering, because internal keys order by user key first and
//! sequence number second, which is not plain byte order.
//!
//! # Atomicity
//!
//! 1. Write everything to `path.tmp`.
//! 2. Flush and sync the file.
//! 3. Rename `path.tmp` → `path`.

use std::{
    fs::{OpenOptions, rename},
    io::{BufWriter, Write},
    mem,
    path::Path,
};

use crate::encoding::{Encode, Varint32, encode_to_vec};

use super::{BlockHandle, CompressionType, Footer, TableError, block_crc, mask_crc};

/// Target uncompressed size of a data block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Entries between two full (unshared) keys.
pub const DEFAULT_RESTART_INTERVAL: usize = 16;

/// Builds an internal key: `user_key` followed by the fixed64 tag
/// `(sequence << 8) | kind`.
///
/// `kind` 0 marks a deletion, 1 a value.
pub fn internal_key(user_key: &[u8], sequence: u64, kind: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + 8);
    key.extend_from_slice(user_key);
    key.extend_from_slice(&((sequence << 8) | u64::from(kind)).to_le_bytes());
    key
}

// ------------------------------------------------------------------------------------------------
// BlockBuilder
// ------------------------------------------------------------------------------------------------

/// Accumulates prefix-compressed entries for one block.
struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    restart_interval: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    fn new(restart_interval: usize) -> Self {
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            last_key: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Size of the block if it were finished now.
    fn estimated_size(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), TableError> {
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };

        Varint32(shared as u32).encode_to(&mut self.buffer)?;
        Varint32((key.len() - shared) as u32).encode_to(&mut self.buffer)?;
        Varint32(value.len() as u32).encode_to(&mut self.buffer)?;
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        Ok(())
    }

    /// Appends the restart array and returns the block contents,
    /// leaving the builder empty.
    fn finish(&mut self) -> Result<Vec<u8>, TableError> {
        let mut out = mem::take(&mut self.buffer);
        for restart in &self.restarts {
            restart.encode_to(&mut out)?;
        }
        (self.restarts.len() as u32).encode_to(&mut out)?;

        self.restarts = vec![0];
        self.counter = 0;
        self.last_key.clear();
        Ok(out)
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

/// Compresses (when worthwhile) and writes one block plus its trailer.
///
/// `offset` tracks the file position and is advanced past the trailer.
fn write_block(
    writer: &mut impl Write,
    offset: &mut u64,
    raw: &[u8],
    compression: CompressionType,
) -> Result<BlockHandle, TableError> {
    let compressed = match compression {
        CompressionType::None => None,
        CompressionType::Snappy => Some(
            snap::raw::Encoder::new()
                .compress_vec(raw)
                .map_err(|e| TableError::Corruption(format!("snappy compress: {e}")))?,
        ),
        CompressionType::Zstd => Some(zstd::bulk::compress(raw, 1)?),
    };

    // Keep the compressed form only if it saves at least 12.5%.
    let (contents, block_type) = match compressed {
        Some(c) if c.len() < raw.len() - raw.len() / 8 => (c, compression),
        _ => (raw.to_vec(), CompressionType::None),
    };

    let handle = BlockHandle {
        offset: *offset,
        size: contents.len() as u64,
    };
    let type_byte = block_type.to_byte();
    let crc = mask_crc(block_crc(&contents, type_byte));

    writer.write_all(&contents)?;
    writer.write_all(&[type_byte])?;
    writer.write_all(&crc.to_le_bytes())?;

    *offset += (contents.len() + super::BLOCK_TRAILER_SIZE) as u64;
    Ok(handle)
}

// ------------------------------------------------------------------------------------------------
// TableBuilder: public entry point
// ------------------------------------------------------------------------------------------------

/// Builds a complete table file on disk.
///
/// # Example
///
/// ```rust,ignore
/// let size = TableBuilder::new(&path)
///     .compression(CompressionType::Snappy)
///     .build(entries.into_iter())?;
/// ```
pub struct TableBuilder<P: AsRef<Path>> {
    path: P,
    block_size: usize,
    restart_interval: usize,
    compression: CompressionType,
}

impl<P: AsRef<Path>> TableBuilder<P> {
    /// Create a builder targeting the given output path.
    pub fn new(path: P) -> Self {
        Self {
            path,
            block_size: DEFAULT_BLOCK_SIZE,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            compression: CompressionType::None,
        }
    }

    /// Target uncompressed data-block size.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Entries between restart points.
    pub fn restart_interval(mut self, restart_interval: usize) -> Self {
        self.restart_interval = restart_interval;
        self
    }

    /// Codec applied to data and index blocks.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Consumes `(key, value)` pairs and writes the table.
    ///
    /// Returns the final file size in bytes. An empty stream produces a
    /// valid table with an empty index.
    ///
    /// # Errors
    ///
    /// - [`TableError::InvalidArgument`] for a zero block size or restart interval.
    /// - I/O errors from writing, syncing or renaming.
    pub fn build(
        self,
        entries: impl Iterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<u64, TableError> {
        if self.block_size == 0 {
            return Err(TableError::InvalidArgument("block_size must be > 0".into()));
        }
        if self.restart_interval == 0 {
            return Err(TableError::InvalidArgument(
                "restart_interval must be > 0".into(),
            ));
        }

        let final_path = self.path.as_ref();
        let tmp_path = final_path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(&mut file);
        let mut offset = 0u64;

        // 1. Data blocks, one index entry per block keyed by its last key.
        let mut data_block = BlockBuilder::new(self.restart_interval);
        let mut index_block = BlockBuilder::new(1);
        for (key, value) in entries {
            data_block.add(&key, &value)?;
            if data_block.estimated_size() >= self.block_size {
                let last_key = data_block.last_key.clone();
                let raw = data_block.finish()?;
                let handle = write_block(&mut writer, &mut offset, &raw, self.compression)?;
                index_block.add(&last_key, &encode_to_vec(&handle)?)?;
            }
        }
        if !data_block.is_empty() {
            let last_key = data_block.last_key.clone();
            let raw = data_block.finish()?;
            let handle = write_block(&mut writer, &mut offset, &raw, self.compression)?;
            index_block.add(&last_key, &encode_to_vec(&handle)?)?;
        }

        // 2. Metaindex (no filters or stats are written).
        let metaindex_raw = BlockBuilder::new(self.restart_interval).finish()?;
        let metaindex = write_block(&mut writer, &mut offset, &metaindex_raw, CompressionType::None)?;

        // 3. Index.
        let index_raw = index_block.finish()?;
        let index = write_block(&mut writer, &mut offset, &index_raw, self.compression)?;

        // 4. Footer.
        let footer_bytes = encode_to_vec(&Footer { metaindex, index })?;
        writer.write_all(&footer_bytes)?;
        offset += footer_bytes.len() as u64;

        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        rename(&tmp_path, final_path)?;
        Ok(offset)
    }
}
