//! Conversion helpers for length prefix encoding.

use super::format::Endianness;
use crate::error::{PipelineError, Result};

fn unsupported_width(size: usize) -> PipelineError {
    PipelineError::invalid_config(format!(
        "unsupported length prefix size {size}; expected 1, 2, 4 or 8"
    ))
}

/// Reads a `size`-byte unsigned integer from the front of `bytes`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfiguration`] if `size` is not one of
/// `1`, `2`, `4` or `8`, and [`PipelineError::MalformedFrame`] if `bytes` is
/// shorter than `size`.
pub fn bytes_to_u64(bytes: &[u8], size: usize, endianness: Endianness) -> Result<u64> {
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Err(unsupported_width(size));
    }
    let Some(prefix) = bytes.get(..size) else {
        return Err(PipelineError::malformed(format!(
            "incomplete length prefix: have {}, need {size}",
            bytes.len()
        )));
    };

    let mut buf = [0u8; 8];
    let val = match endianness {
        Endianness::Big => {
            buf[8 - size..].copy_from_slice(prefix);
            u64::from_be_bytes(buf)
        }
        Endianness::Little => {
            buf[..size].copy_from_slice(prefix);
            u64::from_le_bytes(buf)
        }
    };
    Ok(val)
}

/// Encodes `len` into `out` as a `size`-byte unsigned integer and returns the
/// number of bytes written.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfiguration`] for unsupported widths and
/// [`PipelineError::EncodingOverflow`] if `len` does not fit in `size` bytes.
#[must_use = "length prefix byte count must be used"]
pub fn u64_to_bytes(
    len: usize,
    size: usize,
    endianness: Endianness,
    out: &mut [u8; 8],
) -> Result<usize> {
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Err(unsupported_width(size));
    }
    let value = u64::try_from(len).map_err(|_| overflow(len, size))?;
    if size < 8 && value >> (size * 8) != 0 {
        return Err(overflow(len, size));
    }

    match endianness {
        Endianness::Big => out[..size].copy_from_slice(&value.to_be_bytes()[8 - size..]),
        Endianness::Little => out[..size].copy_from_slice(&value.to_le_bytes()[..size]),
    }
    out[size..].fill(0);

    Ok(size)
}

fn overflow(len: usize, size: usize) -> PipelineError {
    PipelineError::EncodingOverflow {
        value: i128::try_from(len).unwrap_or(i128::MAX),
        width: u32::try_from(size * 8).unwrap_or(u32::MAX),
    }
}
