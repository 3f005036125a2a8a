//! Length-prefixed framing.
//!
//! A wire frame is `offset` leading header bytes, a length field of
//! [`LengthFormat::bytes`] bytes, then that many payload bytes. The decoder
//! peeks the length field and consumes nothing until the whole frame is
//! buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use tokio_util::codec::{Decoder, Encoder};

use super::format::LengthFormat;
use crate::error::{PipelineError, Result};

const fn default_max_frame_length() -> usize { 64 * 1024 }

/// Configuration for [`LengthPrefixedCodec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct LengthFieldConfig {
    /// Number of header bytes preceding the length field.
    #[serde(default)]
    pub offset: usize,
    /// Width and byte order of the length field.
    #[serde(default)]
    pub format: LengthFormat,
    /// Largest payload the decoder accepts.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
    /// Emit the complete wire frame, length field included.
    #[serde(default)]
    pub keep_header: bool,
}

impl LengthFieldConfig {
    /// Configuration with a length field of `format` at offset zero.
    #[must_use]
    pub fn new(format: LengthFormat) -> Self {
        Self {
            offset: 0,
            format,
            max_frame_length: default_max_frame_length(),
            keep_header: false,
        }
    }

    /// Set the number of header bytes preceding the length field.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the largest accepted payload.
    #[must_use]
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Keep the length field in emitted frames.
    #[must_use]
    pub fn keep_header(mut self, keep: bool) -> Self {
        self.keep_header = keep;
        self
    }

    fn header_len(&self) -> usize { self.offset + self.format.bytes }
}

impl Default for LengthFieldConfig {
    fn default() -> Self { Self::new(LengthFormat::default()) }
}

/// Splits frames carrying an explicit length field.
///
/// ```
/// use bytes::BytesMut;
/// use pipeframe::frame::{LengthFieldConfig, LengthFormat, LengthPrefixedCodec};
/// use tokio_util::codec::Decoder;
///
/// let mut codec = LengthPrefixedCodec::new(LengthFieldConfig::new(LengthFormat::u16_be()))
///     .expect("valid config");
/// let mut buf = BytesMut::from(&[0x00, 0x02, b'h', b'i'][..]);
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"hi"[..]));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct LengthPrefixedCodec {
    config: LengthFieldConfig,
}

impl LengthPrefixedCodec {
    /// Build a codec from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] for an unsupported
    /// length field width or a zero maximum frame length.
    pub fn new(config: LengthFieldConfig) -> Result<Self> {
        config.format.validate()?;
        if config.max_frame_length == 0 {
            return Err(PipelineError::invalid_config(
                "max frame length must be positive",
            ));
        }
        Ok(Self { config })
    }

    /// The configuration this codec was built from.
    #[must_use]
    pub fn config(&self) -> &LengthFieldConfig { &self.config }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Bytes;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let LengthFieldConfig {
            offset,
            format,
            max_frame_length,
            keep_header,
        } = self.config;
        let header_len = self.config.header_len();
        if src.len() < header_len {
            return Ok(None);
        }

        let len = format.read_len(&src[offset..header_len])?;
        if len > max_frame_length {
            return Err(PipelineError::FrameTooLarge {
                size: len,
                max: max_frame_length,
            });
        }
        let total = header_len.checked_add(len).ok_or(PipelineError::FrameTooLarge {
            size: len,
            max: max_frame_length,
        })?;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        if keep_header {
            return Ok(Some(src.split_to(total).freeze()));
        }
        if offset == 0 {
            src.advance(header_len);
            return Ok(Some(src.split_to(len).freeze()));
        }
        let mut frame = src.split_to(total);
        let payload = frame.split_off(header_len);
        frame.truncate(offset);
        frame.unsplit(payload);
        Ok(Some(frame.freeze()))
    }
}

impl Encoder<Bytes> for LengthPrefixedCodec {
    type Error = PipelineError;

    /// Writes the first `offset` bytes of `item`, the length of the rest,
    /// then the rest.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let offset = self.config.offset;
        if item.len() < offset {
            return Err(PipelineError::malformed(format!(
                "outbound frame of {} bytes is shorter than the {offset}-byte header",
                item.len()
            )));
        }
        let payload_len = item.len() - offset;
        if payload_len > self.config.max_frame_length {
            return Err(PipelineError::FrameTooLarge {
                size: payload_len,
                max: self.config.max_frame_length,
            });
        }
        dst.reserve(item.len() + self.config.format.bytes);
        dst.put_slice(&item[..offset]);
        self.config.format.write_len(payload_len, dst)?;
        dst.put_slice(&item[offset..]);
        Ok(())
    }
}
