//! Capped greedy framing.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{PipelineError, Result};

/// Treats everything currently buffered as one frame, up to a cap.
///
/// More than `max` unread bytes discards the buffer and fails with
/// [`PipelineError::FrameTooLarge`], which closes the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CappedGreedyCodec {
    max: usize,
}

impl CappedGreedyCodec {
    /// Create a codec accepting frames of at most `max` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `max` is zero.
    pub fn new(max: usize) -> Result<Self> {
        if max == 0 {
            return Err(PipelineError::invalid_config(
                "max frame size must be positive",
            ));
        }
        Ok(Self { max })
    }

    /// Largest accepted frame.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max }
}

impl Decoder for CappedGreedyCodec {
    type Item = Bytes;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src.len() > self.max {
            let size = src.len();
            src.clear();
            return Err(PipelineError::FrameTooLarge {
                size,
                max: self.max,
            });
        }
        Ok(Some(src.split().freeze()))
    }
}

impl Encoder<Bytes> for CappedGreedyCodec {
    type Error = PipelineError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max {
            return Err(PipelineError::FrameTooLarge {
                size: item.len(),
                max: self.max,
            });
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}
