//! The [`Stage`] trait implemented by every pipeline element.

use super::{PipelineEvent, StageContext};
use crate::{error::Result, message::Message};

/// A processing element in a connection's pipeline.
///
/// Inbound hooks receive messages travelling head-to-tail and forward them
/// with [`StageContext::fire_read`]; outbound hooks receive writes travelling
/// tail-to-head and forward them with [`StageContext::write`]. Every hook has
/// a pass-through default, so a stage implements only the directions it
/// cares about.
///
/// Returning an error from a hook reports a fault: the pipeline consults its
/// recovery hook once and either drops the in-flight message or closes the
/// connection.
///
/// ```
/// use pipeframe::{Message, Result, Stage, StageContext};
///
/// struct Upper;
///
/// impl Stage for Upper {
///     fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
///         match msg.downcast::<String>() {
///             Ok(text) => ctx.fire_read(Message::new(text.to_uppercase())),
///             Err(other) => ctx.fire_read(other),
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Stage: Send + 'static {
    /// The connection became active, or the stage was added to an active
    /// pipeline.
    ///
    /// Every stage is notified in head-to-tail order; there is nothing to
    /// forward.
    fn on_connect(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> { Ok(()) }

    /// An inbound message reached this stage.
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        ctx.fire_read(msg);
        Ok(())
    }

    /// An inbound event reached this stage.
    fn on_event(&mut self, ctx: &mut StageContext<'_>, event: PipelineEvent) -> Result<()> {
        ctx.fire_event(event);
        Ok(())
    }

    /// An outbound message reached this stage.
    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        ctx.write(msg)
    }

    /// The connection closed, or the stage was removed from an open pipeline.
    ///
    /// Every stage is notified in head-to-tail order. Release timers and
    /// buffers here.
    fn on_close(&mut self, _ctx: &mut StageContext<'_>) {}

    /// Faults raised by a non-fatal stage always drop the in-flight message
    /// and never close the connection.
    fn non_fatal(&self) -> bool { false }
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn on_connect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        (**self).on_connect(ctx)
    }

    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        (**self).on_read(ctx, msg)
    }

    fn on_event(&mut self, ctx: &mut StageContext<'_>, event: PipelineEvent) -> Result<()> {
        (**self).on_event(ctx, event)
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        (**self).on_write(ctx, msg)
    }

    fn on_close(&mut self, ctx: &mut StageContext<'_>) { (**self).on_close(ctx); }

    fn non_fatal(&self) -> bool { (**self).non_fatal() }
}
