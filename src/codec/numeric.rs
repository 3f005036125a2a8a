//! Fixed-width integer codecs.
//!
//! Integers travel as signed two's-complement values in network byte order.

use std::{fmt, marker::PhantomData};

use bytes::Bytes;

use super::{MessageDecoder, MessageEncoder};
use crate::{
    byte_order::{read_network_i16, read_network_i32, write_network_i16, write_network_i32},
    error::{PipelineError, Result},
    message::Message,
    pipeline::{Stage, StageContext},
};

/// Signed integer with a fixed big-endian wire representation.
pub trait WireInt:
    Copy + Send + fmt::Debug + fmt::Display + Into<i128> + TryFrom<i128> + 'static
{
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encoded width in bits.
    const BITS: u32;

    /// Decode from exactly [`WireInt::WIDTH`] bytes.
    fn from_wire(bytes: &[u8]) -> Option<Self>;

    /// Encode to [`WireInt::WIDTH`] bytes.
    fn to_wire(self) -> Bytes;

    /// Convert `value`, failing with [`PipelineError::EncodingOverflow`]
    /// when it is out of range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EncodingOverflow`] if `value` does not fit.
    fn checked_from(value: i128) -> Result<Self> {
        Self::try_from(value).map_err(|_| PipelineError::EncodingOverflow {
            value,
            width: Self::BITS,
        })
    }
}

impl WireInt for i16 {
    const WIDTH: usize = 2;
    const BITS: u32 = 16;

    fn from_wire(bytes: &[u8]) -> Option<Self> {
        <[u8; 2]>::try_from(bytes).ok().map(read_network_i16)
    }

    fn to_wire(self) -> Bytes { Bytes::copy_from_slice(&write_network_i16(self)) }
}

impl WireInt for i32 {
    const WIDTH: usize = 4;
    const BITS: u32 = 32;

    fn from_wire(bytes: &[u8]) -> Option<Self> {
        <[u8; 4]>::try_from(bytes).ok().map(read_network_i32)
    }

    fn to_wire(self) -> Bytes { Bytes::copy_from_slice(&write_network_i32(self)) }
}

/// Stage converting between frames and integers of type `T`.
///
/// Inbound frames must be exactly `T::WIDTH` bytes long. Outbound, both `T`
/// and `i64` values are encoded; an `i64` outside `T`'s range fails with
/// [`PipelineError::EncodingOverflow`].
///
/// ```
/// use pipeframe::codec::{IntegerCodec, WireInt};
///
/// assert_eq!(&i16::to_wire(-2)[..], &[0xff, 0xfe]);
/// let _stage = IntegerCodec::<i16>::new();
/// ```
#[derive(Debug)]
pub struct IntegerCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireInt> IntegerCodec<T> {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: WireInt> Default for IntegerCodec<T> {
    fn default() -> Self { Self::new() }
}

impl<T: WireInt> Stage for IntegerCodec<T> {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        let frame = match msg.downcast::<Bytes>() {
            Ok(frame) => frame,
            Err(other) => {
                ctx.fire_read(other);
                return Ok(());
            }
        };
        let value = T::from_wire(&frame).ok_or_else(|| {
            PipelineError::malformed(format!(
                "expected {} bytes for a {}-bit integer, got {}",
                T::WIDTH,
                T::BITS,
                frame.len()
            ))
        })?;
        ctx.fire_read(Message::new(value));
        Ok(())
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        let value = match msg.downcast::<T>() {
            Ok(value) => value,
            Err(other) => match other.downcast::<i64>() {
                Ok(wide) => T::checked_from(i128::from(wide))?,
                Err(other) => return ctx.write(other),
            },
        };
        ctx.write(Message::new(value.to_wire()))
    }
}

/// Decoder reading consecutive 32-bit integers from a frame and emitting
/// their absolute values.
///
/// Trailing bytes that do not form a whole integer make the frame
/// malformed. `i32::MIN` has no positive counterpart and fails with
/// [`PipelineError::EncodingOverflow`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AbsIntegerDecoder;

impl MessageDecoder for AbsIntegerDecoder {
    type Input = Bytes;

    fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        let chunks = input.chunks_exact(i32::WIDTH);
        if !chunks.remainder().is_empty() {
            return Err(PipelineError::malformed(format!(
                "{} trailing bytes after 32-bit integers",
                chunks.remainder().len()
            )));
        }
        push_abs_values(chunks, out)
    }
}

/// Outbound counterpart of [`AbsIntegerDecoder`]: turns a buffer written by
/// the application into the absolute values of the 32-bit integers it holds.
///
/// Bytes past the last whole integer are ignored. Put an
/// [`IntegerCodec<i32>`] closer to the head to put the values back on the
/// wire.
#[derive(Clone, Copy, Debug, Default)]
pub struct AbsIntegerEncoder;

impl MessageEncoder for AbsIntegerEncoder {
    type Input = Bytes;

    fn encode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        let chunks = input.chunks_exact(i32::WIDTH);
        if !chunks.remainder().is_empty() {
            tracing::trace!(
                trailing = chunks.remainder().len(),
                "ignoring bytes after the last 32-bit integer"
            );
        }
        push_abs_values(chunks, out)
    }
}

fn push_abs_values(chunks: std::slice::ChunksExact<'_, u8>, out: &mut Vec<Message>) -> Result<()> {
    for chunk in chunks {
        let value =
            i32::from_wire(chunk).ok_or_else(|| PipelineError::malformed("short integer"))?;
        let abs = value.checked_abs().ok_or(PipelineError::EncodingOverflow {
            value: i128::from(value),
            width: i32::BITS,
        })?;
        out.push(Message::new(abs));
    }
    Ok(())
}
