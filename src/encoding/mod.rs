//! Binary primitives of the LevelDB table format.
//!
//! The table format mixes two integer encodings:
//!
//! | Rust type   | Encoding                                                  |
//! |-------------|-----------------------------------------------------------|
//! | `u32`       | 4 bytes, little-endian (`fixed32`)                        |
//! | `u64`       | 8 bytes, little-endian (`fixed64`)                        |
//! | [`Varint32`]| 1–5 bytes, 7 bits per byte, high bit = continuation       |
//! | [`Varint64`]| 1–10 bytes, 7 bits per byte, high bit = continuation      |
//!
//! Block handles, block entry headers and the footer are built from these.
//!
//! # Zero-panic guarantee
//!
//! Decoders never index past the end of their input. Every short read is
//! reported as [`EncodingError::UnexpectedEof`] so callers can classify it
//! as a truncated table.
//!
//! ```rust,ignore
//! use ldb_reclaim::encoding::{decode_from_slice, Varint64};
//!
//! let (Varint64(offset), consumed) = decode_from_slice::<Varint64>(&bytes)?;
//! ```


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Longest legal encoding of a 32-bit varint.
pub const MAX_VARINT32_LEN: usize = 5;

/// Longest legal encoding of a 64-bit varint.
pub const MAX_VARINT64_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A varint carried more continuation bytes than its width allows.
    #[error("varint exceeds {max_len} bytes")]
    VarintOverflow {
        /// Maximum byte length for the varint width being decoded.
        max_len: usize,
    },
}

impl EncodingError {
    /// Whether this error means the input simply ended too early.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof { .. })
    }
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` on success so that callers can
/// advance a cursor through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience functions
// ------------------------------------------------------------------------------------------------

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

/// Verify that `buf` has at least `needed` bytes, returning
/// [`EncodingError::UnexpectedEof`] if not.
#[inline]
pub(crate) fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Fixed-width integers
// ------------------------------------------------------------------------------------------------

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        Ok((u32::from_le_bytes(bytes), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        Ok((u64::from_le_bytes(bytes), 8))
    }
}

// ------------------------------------------------------------------------------------------------
// Varints
// ------------------------------------------------------------------------------------------------

/// A `u32` stored in the variable-length encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Varint32(pub u32);

/// A `u64` stored in the variable-length encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Varint64(pub u64);

fn put_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn get_varint(buf: &[u8], max_len: usize) -> Result<(u64, usize), EncodingError> {
    let mut result = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= max_len {
            return Err(EncodingError::VarintOverflow { max_len });
        }
        result |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    // Either empty or every byte had its continuation bit set.
    if buf.len() >= max_len {
        return Err(EncodingError::VarintOverflow { max_len });
    }
    Err(EncodingError::UnexpectedEof {
        needed: buf.len() + 1,
        available: buf.len(),
    })
}

impl Encode for Varint32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        put_varint(u64::from(self.0), buf);
        Ok(())
    }
}

impl Decode for Varint32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (value, n) = get_varint(buf, MAX_VARINT32_LEN)?;
        let value = u32::try_from(value).map_err(|_| EncodingError::VarintOverflow {
            max_len: MAX_VARINT32_LEN,
        })?;
        Ok((Varint32(value), n))
    }
}

impl Encode for Varint64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        put_varint(self.0, buf);
        Ok(())
    }
}

impl Decode for Varint64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (value, n) = get_varint(buf, MAX_VARINT64_LEN)?;
        Ok((Varint64(value), n))
    }
}
