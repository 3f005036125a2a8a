//! Message codec stages.
//!
//! A codec stage converts one message type into zero or more messages of
//! another type. Decoders act on inbound messages, encoders on outbound
//! ones. Messages of a type the codec does not handle are forwarded
//! unchanged unless the stage is marked terminal, in which case they fault
//! with [`PipelineError::UnsupportedMessage`].
//!
//! Implement [`MessageDecoder`] or [`MessageEncoder`] and wrap the value in
//! [`DecoderStage`], [`EncoderStage`], [`CodecStage`] or [`CombinedCodec`]
//! to run it in a pipeline:
//!
//! ```
//! use bytes::Bytes;
//! use pipeframe::{
//!     Message,
//!     Result,
//!     codec::{DecoderStage, MessageDecoder},
//! };
//!
//! struct Len;
//!
//! impl MessageDecoder for Len {
//!     type Input = Bytes;
//!
//!     fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
//!         out.push(Message::new(input.len()));
//!         Ok(())
//!     }
//! }
//!
//! let _stage = DecoderStage::new(Len);
//! ```
//!
//! [`PipelineError::UnsupportedMessage`]: crate::PipelineError::UnsupportedMessage

pub mod binary;
mod combined;
pub mod log_event;
pub mod numeric;
pub mod text;
pub mod translate;


use std::any::Any;

pub use self::{
    binary::BincodeCodec,
    combined::CombinedCodec,
    log_event::{LogEvent, LogEventCodec},
    numeric::{AbsIntegerDecoder, AbsIntegerEncoder, IntegerCodec, WireInt},
    text::{CharDecoder, CharEncoder, IntegerTextCodec, Utf8Codec, char_codec},
    translate::{FrameKind, FrameTranslator, TaggedFrame, WireFrame, WireFrameCodec},
};
use crate::{
    error::Result,
    message::Message,
    pipeline::{Stage, StageContext},
};

/// Converts inbound messages of one type into zero or more messages.
pub trait MessageDecoder: Send + 'static {
    /// Type of message this decoder consumes.
    type Input: Any + Send;

    /// Decode `input`, pushing results onto `out` in forwarding order.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` cannot be decoded.
    fn decode(&mut self, input: Self::Input, out: &mut Vec<Message>) -> Result<()>;
}

/// Converts outbound messages of one type into zero or more messages.
pub trait MessageEncoder: Send + 'static {
    /// Type of message this encoder consumes.
    type Input: Any + Send;

    /// Encode `input`, pushing results onto `out` in forwarding order.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` cannot be encoded.
    fn encode(&mut self, input: Self::Input, out: &mut Vec<Message>) -> Result<()>;
}

pub(crate) fn decode_inbound<D: MessageDecoder>(
    decoder: &mut D,
    ctx: &mut StageContext<'_>,
    msg: Message,
    terminal: bool,
) -> Result<()> {
    match msg.downcast::<D::Input>() {
        Ok(input) => {
            let mut out = Vec::new();
            decoder.decode(input, &mut out)?;
            for decoded in out {
                ctx.fire_read(decoded);
            }
            Ok(())
        }
        Err(other) if terminal => Err(ctx.unsupported(&other)),
        Err(other) => {
            ctx.fire_read(other);
            Ok(())
        }
    }
}

pub(crate) fn encode_outbound<E: MessageEncoder>(
    encoder: &mut E,
    ctx: &mut StageContext<'_>,
    msg: Message,
    terminal: bool,
) -> Result<()> {
    match msg.downcast::<E::Input>() {
        Ok(input) => {
            let mut out = Vec::new();
            encoder.encode(input, &mut out)?;
            for encoded in out {
                ctx.write(encoded)?;
            }
            Ok(())
        }
        Err(other) if terminal => Err(ctx.unsupported(&other)),
        Err(other) => ctx.write(other),
    }
}

/// Runs a [`MessageDecoder`] on inbound messages.
pub struct DecoderStage<D> {
    decoder: D,
    terminal: bool,
}

impl<D: MessageDecoder> DecoderStage<D> {
    /// Wrap `decoder`; unrecognised messages are forwarded.
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            terminal: false,
        }
    }

    /// Fault on unrecognised messages instead of forwarding them.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

impl<D: MessageDecoder> Stage for DecoderStage<D> {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        decode_inbound(&mut self.decoder, ctx, msg, self.terminal)
    }
}

/// Runs a [`MessageEncoder`] on outbound messages.
pub struct EncoderStage<E> {
    encoder: E,
    terminal: bool,
}

impl<E: MessageEncoder> EncoderStage<E> {
    /// Wrap `encoder`; unrecognised messages are forwarded.
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            terminal: false,
        }
    }

    /// Fault on unrecognised messages instead of forwarding them.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

impl<E: MessageEncoder> Stage for EncoderStage<E> {
    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        encode_outbound(&mut self.encoder, ctx, msg, self.terminal)
    }
}

/// Runs a value implementing both [`MessageDecoder`] and [`MessageEncoder`].
pub struct CodecStage<C> {
    codec: C,
    terminal: bool,
}

impl<C: MessageDecoder + MessageEncoder> CodecStage<C> {
    /// Wrap `codec`; unrecognised messages are forwarded.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            terminal: false,
        }
    }

    /// Fault on unrecognised messages in either direction.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

impl<C: MessageDecoder + MessageEncoder> Stage for CodecStage<C> {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        decode_inbound(&mut self.codec, ctx, msg, self.terminal)
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        encode_outbound(&mut self.codec, ctx, msg, self.terminal)
    }
}
