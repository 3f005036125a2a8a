//! Fixed-length framing.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{PipelineError, Result};

/// Emits one frame for every `len` buffered bytes.
///
/// ```
/// use bytes::BytesMut;
/// use pipeframe::frame::FixedLengthCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = FixedLengthCodec::new(3).expect("non-zero length");
/// let mut buf = BytesMut::from(&b"abcdefg"[..]);
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"abc"[..]));
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"def"[..]));
/// assert!(codec.decode(&mut buf).unwrap().is_none());
/// assert_eq!(&buf[..], b"g");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedLengthCodec {
    len: usize,
}

impl FixedLengthCodec {
    /// Create a codec emitting `len`-byte frames.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `len` is zero.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(PipelineError::invalid_config(
                "frame length must be a positive integer: 0",
            ));
        }
        Ok(Self { len })
    }

    /// Length of every frame.
    #[must_use]
    pub fn frame_len(&self) -> usize { self.len }
}

impl Decoder for FixedLengthCodec {
    type Item = Bytes;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < self.len {
            return Ok(None);
        }
        Ok(Some(src.split_to(self.len).freeze()))
    }
}

impl Encoder<Bytes> for FixedLengthCodec {
    type Error = PipelineError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
