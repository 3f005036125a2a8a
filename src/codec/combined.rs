//! Pairing of an independent decoder and encoder in one stage.

use super::{MessageDecoder, MessageEncoder, decode_inbound, encode_outbound};
use crate::{
    error::Result,
    message::Message,
    pipeline::{Stage, StageContext},
};

/// Stage delegating reads to `D` and writes to `E`.
///
/// Each half keeps its own state and forwards what it does not recognise.
pub struct CombinedCodec<D, E> {
    decoder: D,
    encoder: E,
}

impl<D, E> CombinedCodec<D, E> {
    /// Pair `decoder` with `encoder`.
    pub fn new(decoder: D, encoder: E) -> Self { Self { decoder, encoder } }

    /// The inbound half.
    pub fn decoder(&self) -> &D { &self.decoder }

    /// The outbound half.
    pub fn encoder(&self) -> &E { &self.encoder }
}

impl<D, E> Stage for CombinedCodec<D, E>
where
    D: MessageDecoder,
    E: MessageEncoder,
{
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        decode_inbound(&mut self.decoder, ctx, msg, false)
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        encode_outbound(&mut self.encoder, ctx, msg, false)
    }
}
