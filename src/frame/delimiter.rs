//! Delimiter-based framing.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{PipelineError, Result};

/// Splits frames on a separator byte.
///
/// The separator is not part of the emitted frame. The decoder remembers how
/// much of the buffer it has already searched so a slowly arriving frame is
/// scanned once.
#[derive(Clone, Debug)]
pub struct DelimiterCodec {
    delimiter: u8,
    max_frame_length: usize,
    strip_cr: bool,
    next_index: usize,
}

impl DelimiterCodec {
    /// Create a codec splitting on `delimiter`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `max_frame_length`
    /// is zero.
    pub fn new(delimiter: u8, max_frame_length: usize) -> Result<Self> {
        if max_frame_length == 0 {
            return Err(PipelineError::invalid_config(
                "max frame length must be positive",
            ));
        }
        Ok(Self {
            delimiter,
            max_frame_length,
            strip_cr: false,
            next_index: 0,
        })
    }

    /// Newline-delimited frames; a trailing `\r` is stripped as well.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `max_frame_length`
    /// is zero.
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use pipeframe::frame::DelimiterCodec;
    /// use tokio_util::codec::Decoder;
    ///
    /// let mut codec = DelimiterCodec::lines(64).expect("valid max");
    /// let mut buf = BytesMut::from(&b"hello\r\nwor"[..]);
    /// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"hello"[..]));
    /// assert!(codec.decode(&mut buf).unwrap().is_none());
    /// assert_eq!(&buf[..], b"wor");
    /// ```
    pub fn lines(max_frame_length: usize) -> Result<Self> {
        let mut codec = Self::new(b'\n', max_frame_length)?;
        codec.strip_cr = true;
        Ok(codec)
    }

    /// The separator byte.
    #[must_use]
    pub fn delimiter(&self) -> u8 { self.delimiter }
}

impl Decoder for DelimiterCodec {
    type Item = Bytes;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let start = self.next_index.min(src.len());
        let found = src[start..]
            .iter()
            .position(|b| *b == self.delimiter)
            .map(|pos| start + pos);

        let Some(pos) = found else {
            self.next_index = src.len();
            if src.len() > self.max_frame_length {
                let size = src.len();
                src.clear();
                self.next_index = 0;
                return Err(PipelineError::FrameTooLarge {
                    size,
                    max: self.max_frame_length,
                });
            }
            return Ok(None);
        };

        self.next_index = 0;
        if pos > self.max_frame_length {
            src.advance(pos + 1);
            return Err(PipelineError::FrameTooLarge {
                size: pos,
                max: self.max_frame_length,
            });
        }
        let mut frame = src.split_to(pos);
        src.advance(1);
        if self.strip_cr && frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }
        Ok(Some(frame.freeze()))
    }
}

impl Encoder<Bytes> for DelimiterCodec {
    type Error = PipelineError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(&item);
        dst.extend_from_slice(&[self.delimiter]);
        Ok(())
    }
}
