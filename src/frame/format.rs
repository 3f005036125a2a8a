//! Length prefix formatting options.

use bytes::BytesMut;
use serde::Deserialize;

use super::conversion::{bytes_to_u64, u64_to_bytes};
use crate::error::{PipelineError, Result};

/// Byte order used for encoding and decoding length prefixes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Most significant byte first.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

/// Width and byte order of a length field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct LengthFormat {
    /// Width of the length field in bytes: 1, 2, 4 or 8.
    pub bytes: usize,
    /// Byte order of the length field.
    #[serde(default)]
    pub endianness: Endianness,
}

impl LengthFormat {
    /// Creates a new `LengthFormat`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] unless `bytes` is one
    /// of `1`, `2`, `4` or `8`.
    pub fn new(bytes: usize, endianness: Endianness) -> Result<Self> {
        let format = Self { bytes, endianness };
        format.validate()?;
        Ok(format)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if matches!(self.bytes, 1 | 2 | 4 | 8) {
            Ok(())
        } else {
            Err(PipelineError::invalid_config(format!(
                "length field width must be 1, 2, 4 or 8 bytes, got {}",
                self.bytes
            )))
        }
    }

    /// 2-byte big-endian length prefix.
    #[must_use]
    pub const fn u16_be() -> Self {
        Self {
            bytes: 2,
            endianness: Endianness::Big,
        }
    }

    /// 2-byte little-endian length prefix.
    #[must_use]
    pub const fn u16_le() -> Self {
        Self {
            bytes: 2,
            endianness: Endianness::Little,
        }
    }

    /// 4-byte big-endian length prefix.
    #[must_use]
    pub const fn u32_be() -> Self {
        Self {
            bytes: 4,
            endianness: Endianness::Big,
        }
    }

    /// 4-byte little-endian length prefix.
    #[must_use]
    pub const fn u32_le() -> Self {
        Self {
            bytes: 4,
            endianness: Endianness::Little,
        }
    }

    /// 8-byte big-endian length prefix.
    #[must_use]
    pub const fn u64_be() -> Self {
        Self {
            bytes: 8,
            endianness: Endianness::Big,
        }
    }

    /// Read a length prefix from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is shorter than the prefix or the decoded
    /// length does not fit in `usize`.
    pub fn read_len(&self, bytes: &[u8]) -> Result<usize> {
        let len = bytes_to_u64(bytes, self.bytes, self.endianness)?;
        usize::try_from(len).map_err(|_| PipelineError::FrameTooLarge {
            size: usize::MAX,
            max: usize::MAX,
        })
    }

    /// Append `len` to `dst` using this format.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EncodingOverflow`] if `len` cannot be
    /// represented by the prefix width.
    pub fn write_len(&self, len: usize, dst: &mut BytesMut) -> Result<()> {
        let mut buf = [0u8; 8];
        let written = u64_to_bytes(len, self.bytes, self.endianness, &mut buf)?;
        dst.extend_from_slice(&buf[..written]);
        Ok(())
    }
}

impl Default for LengthFormat {
    fn default() -> Self { Self::u32_be() }
}
