//! Block-level iteration.
//!
//! Data and index blocks share one layout. Keys are prefix-compressed
//! against the previous key, and every `restart_interval` entries a full
//! key is stored so that readers could binary-search the restart array.
//!
//! ```text
//! [ENTRY]… [RESTART_0: fixed32]… [NUM_RESTARTS: fixed32]
//!
//! ENTRY = [shared: varint32][non_shared: varint32][value_len: varint32]
//!         [KEY_DELTA (non_shared bytes)][VALUE (value_len bytes)]
//! ```
//!
//! Only forward iteration is implemented; the analyzer reads every entry
//! exactly once, so the restart array is validated but never searched.

use crate::encoding::{Decode, Varint32};

use super::TableError;

// ------------------------------------------------------------------------------------------------
// Block Entry
// ------------------------------------------------------------------------------------------------

/// A fully decoded block entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// Full key, with the shared prefix restored.
    pub key: Vec<u8>,

    /// Value bytes. For index blocks this is an encoded block handle.
    pub value: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// Block Iterator
// ------------------------------------------------------------------------------------------------

/// Forward iterator over the entries of one decoded block.
///
/// A malformed block yields a single [`TableError::Corruption`] and then
/// ends.
pub struct BlockIterator {
    /// Decompressed block contents, restart array included.
    data: Vec<u8>,

    /// Offset of the restart array; entries live in `data[..limit]`.
    limit: usize,

    /// Cursor into `data`, always pointing at the next entry header.
    cursor: usize,

    /// Key of the previously decoded entry.
    last_key: Vec<u8>,

    /// Deferred layout error, reported on the first `next()`.
    error: Option<String>,
}

impl BlockIterator {
    /// Wraps the contents of one block.
    pub fn new(data: Vec<u8>) -> Self {
        let (limit, error) = match restart_array_offset(&data) {
            Ok(limit) => (limit, None),
            Err(msg) => (0, Some(msg)),
        };
        Self {
            data,
            limit,
            cursor: 0,
            last_key: Vec::new(),
            error,
        }
    }

    fn decode_entry(&mut self) -> Result<BlockEntry, TableError> {
        let region = &self.data[self.cursor..self.limit];
        let mut off = 0;

        let mut header = [0u32; 3];
        for field in header.iter_mut() {
            let (Varint32(v), n) = Varint32::decode_from(&region[off..])
                .map_err(|e| TableError::Corruption(format!("bad block entry header: {e}")))?;
            *field = v;
            off += n;
        }
        let [shared, non_shared, value_len] = header.map(|v| v as usize);

        if shared > self.last_key.len() {
            return Err(TableError::Corruption(format!(
                "entry shares {shared} bytes with a {}-byte previous key",
                self.last_key.len()
            )));
        }
        let key_end = off + non_shared;
        let value_end = key_end + value_len;
        if value_end > region.len() {
            return Err(TableError::Corruption(format!(
                "entry runs {} bytes past the restart array",
                value_end - region.len()
            )));
        }

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&region[off..key_end]);
        let value = region[key_end..value_end].to_vec();
        self.cursor += value_end;

        Ok(BlockEntry {
            key: self.last_key.clone(),
            value,
        })
    }
}

impl Iterator for BlockIterator {
    type Item = Result<BlockEntry, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(msg) = self.error.take() {
            self.cursor = self.limit;
            return Some(Err(TableError::Corruption(msg)));
        }
        if self.cursor >= self.limit {
            return None;
        }
        match self.decode_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.cursor = self.limit;
                Some(Err(e))
            }
        }
    }
}

/// Locates the restart array, checking that it fits inside the block.
fn restart_array_offset(data: &[u8]) -> Result<usize, String> {
    if data.len() < 4 {
        return Err(format!("block of {} bytes has no restart count", data.len()));
    }
    let (num_restarts, _) = u32::decode_from(&data[data.len() - 4..]).map_err(|e| e.to_string())?;
    let array_len = (num_restarts as usize)
        .checked_mul(4)
        .and_then(|n| n.checked_add(4))
        .filter(|&n| n <= data.len())
        .ok_or_else(|| {
            format!(
                "{num_restarts} restart points do not fit in a {}-byte block",
                data.len()
            )
        })?;
    Ok(data.len() - array_len)
}
