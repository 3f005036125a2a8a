//! Adapter running a frame codec as a pipeline stage.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{PipelineError, Result},
    message::Message,
    metrics,
    pipeline::{Stage, StageContext},
    recovery::Direction,
};

/// Stage that splits inbound [`Bytes`] into frames and encodes outbound
/// [`Bytes`] frames.
///
/// Bytes not yet forming a frame stay in the stage's buffer until more
/// arrive. Messages of any other type pass through untouched in both
/// directions.
pub struct FramingStage<C> {
    codec: C,
    buffer: BytesMut,
}

impl<C> FramingStage<C> {
    /// Wrap `codec`.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// The wrapped codec.
    pub fn codec(&self) -> &C { &self.codec }

    /// Bytes buffered and not yet part of an emitted frame.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }
}

impl<C> Stage for FramingStage<C>
where
    C: Decoder<Item = Bytes, Error = PipelineError>
        + Encoder<Bytes, Error = PipelineError>
        + Send
        + 'static,
{
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        let chunk = match msg.downcast::<Bytes>() {
            Ok(chunk) => chunk,
            Err(other) => {
                ctx.fire_read(other);
                return Ok(());
            }
        };
        if chunk.is_empty() {
            return Ok(());
        }
        self.buffer.extend_from_slice(&chunk);
        while ctx.is_open() {
            let Some(frame) = self.codec.decode(&mut self.buffer)? else {
                break;
            };
            metrics::inc_frames(Direction::Inbound);
            ctx.fire_read(Message::new(frame));
        }
        Ok(())
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        let frame = match msg.downcast::<Bytes>() {
            Ok(frame) => frame,
            Err(other) => return ctx.write(other),
        };
        let mut dst = BytesMut::with_capacity(frame.len());
        self.codec.encode(frame, &mut dst)?;
        ctx.write(Message::new(dst.freeze()))
    }

    fn on_close(&mut self, _ctx: &mut StageContext<'_>) { self.buffer = BytesMut::new(); }
}
