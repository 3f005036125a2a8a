//! Events travelling head-to-tail alongside inbound messages.

use crate::{
    idle::{IdleAxis, IdleStateEvent},
    message::Message,
};

/// Non-data notification dispatched through a pipeline.
#[derive(Debug)]
#[non_exhaustive]
pub enum PipelineEvent {
    /// A timer scheduled for `axis` fired. Consumed by the idle monitor.
    IdleTick(IdleAxis),
    /// The connection has been idle for a configured window.
    Idle(IdleStateEvent),
    /// Application-defined event.
    User(Message),
}

impl PipelineEvent {
    /// Wrap an application value as a [`PipelineEvent::User`] event.
    pub fn user<T: std::any::Any + Send>(value: T) -> Self { Self::User(Message::new(value)) }

    /// The idle notification carried by this event, if any.
    #[must_use]
    pub fn as_idle(&self) -> Option<&IdleStateEvent> {
        match self {
            Self::Idle(event) => Some(event),
            _ => None,
        }
    }
}
