//! Text codecs.

use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};

use super::{CombinedCodec, MessageDecoder, MessageEncoder, WireInt};
use crate::{
    byte_order::{read_network_u16, write_network_u16},
    error::{PipelineError, Result},
    message::Message,
};

/// Converts frames to `String`s and back as UTF-8.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl MessageDecoder for Utf8Codec {
    type Input = Bytes;

    fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        let text = String::from_utf8(input.to_vec())
            .map_err(|err| PipelineError::malformed(format!("invalid UTF-8: {err}")))?;
        out.push(Message::new(text));
        Ok(())
    }
}

impl MessageEncoder for Utf8Codec {
    type Input = String;

    fn encode(&mut self, input: String, out: &mut Vec<Message>) -> Result<()> {
        out.push(Message::new(Bytes::from(input)));
        Ok(())
    }
}

/// Decodes frames of 16-bit big-endian code units into `char`s.
#[derive(Clone, Copy, Debug, Default)]
pub struct CharDecoder;

impl MessageDecoder for CharDecoder {
    type Input = Bytes;

    fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        let units = input.chunks_exact(2);
        if !units.remainder().is_empty() {
            return Err(PipelineError::malformed("odd number of bytes in character frame"));
        }
        for unit in units {
            let code = read_network_u16([unit[0], unit[1]]);
            let ch = char::from_u32(u32::from(code)).ok_or_else(|| {
                PipelineError::malformed(format!("unpaired surrogate {code:#06x}"))
            })?;
            out.push(Message::new(ch));
        }
        Ok(())
    }
}

/// Encodes `char`s as 16-bit big-endian code units.
///
/// Characters outside the basic multilingual plane fail with
/// [`PipelineError::EncodingOverflow`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CharEncoder;

impl MessageEncoder for CharEncoder {
    type Input = char;

    fn encode(&mut self, input: char, out: &mut Vec<Message>) -> Result<()> {
        let code = u16::try_from(u32::from(input)).map_err(|_| PipelineError::EncodingOverflow {
            value: i128::from(u32::from(input)),
            width: 16,
        })?;
        let mut buf = BytesMut::with_capacity(2);
        buf.put_slice(&write_network_u16(code));
        out.push(Message::new(buf.freeze()));
        Ok(())
    }
}

/// Character codec pairing [`CharDecoder`] with [`CharEncoder`].
#[must_use]
pub fn char_codec() -> CombinedCodec<CharDecoder, CharEncoder> {
    CombinedCodec::new(CharDecoder, CharEncoder)
}

/// Converts integers to their decimal text and back.
///
/// Inbound `T` values become `String`s. Outbound `String`s are parsed as
/// `T`; text that is not an integer is malformed and an integer outside
/// `T`'s range fails with [`PipelineError::EncodingOverflow`].
///
/// ```
/// use pipeframe::codec::{IntegerTextCodec, MessageEncoder};
///
/// let mut codec = IntegerTextCodec::<i16>::new();
/// let mut out = Vec::new();
/// assert!(codec.encode("70000".to_string(), &mut out).is_err());
/// ```
#[derive(Debug)]
pub struct IntegerTextCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireInt> IntegerTextCodec<T> {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: WireInt> Default for IntegerTextCodec<T> {
    fn default() -> Self { Self::new() }
}

impl<T: WireInt> MessageDecoder for IntegerTextCodec<T> {
    type Input = T;

    fn decode(&mut self, input: T, out: &mut Vec<Message>) -> Result<()> {
        out.push(Message::new(input.to_string()));
        Ok(())
    }
}

impl<T: WireInt> MessageEncoder for IntegerTextCodec<T> {
    type Input = String;

    fn encode(&mut self, input: String, out: &mut Vec<Message>) -> Result<()> {
        let wide: i128 = input
            .trim()
            .parse()
            .map_err(|_| PipelineError::malformed(format!("`{input}` is not an integer")))?;
        out.push(Message::new(T::checked_from(wide)?));
        Ok(())
    }
}
