//! Idle detection and heartbeats.
//!
//! [`IdleMonitor`] watches read and write activity on three independent axes
//! and emits [`PipelineEvent::Idle`] when an axis sees no activity for its
//! window. A zero window disables the axis. [`Heartbeat`] reacts to those
//! events by writing a fixed payload and closes the connection if the write
//! fails.
//!
//! Timing follows a re-arm scheme: each axis keeps one pending timer. When it
//! fires, the monitor compares the elapsed time since the last activity with
//! the window. If the window has not elapsed the timer is re-armed for the
//! remainder; otherwise one event fires and the timer is re-armed for a full
//! window.

use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::time::Instant;

use crate::{
    error::Result,
    message::Message,
    pipeline::{PipelineEvent, Stage, StageContext},
    timer::TimerKey,
};

/// Activity axis watched by an [`IdleMonitor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdleAxis {
    /// No inbound message.
    Read,
    /// No successful outbound write.
    Write,
    /// Neither.
    All,
}

impl IdleAxis {
    const AXES: [IdleAxis; 3] = [IdleAxis::Read, IdleAxis::Write, IdleAxis::All];

    fn index(self) -> usize {
        match self {
            IdleAxis::Read => 0,
            IdleAxis::Write => 1,
            IdleAxis::All => 2,
        }
    }
}

/// Idle condition reported by an [`IdleStateEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleState {
    /// The read window elapsed.
    ReaderIdle,
    /// The write window elapsed.
    WriterIdle,
    /// The combined window elapsed.
    AllIdle,
}

impl From<IdleAxis> for IdleState {
    fn from(axis: IdleAxis) -> Self {
        match axis {
            IdleAxis::Read => IdleState::ReaderIdle,
            IdleAxis::Write => IdleState::WriterIdle,
            IdleAxis::All => IdleState::AllIdle,
        }
    }
}

/// Notification that an axis went idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleStateEvent {
    /// The axis that went idle.
    pub state: IdleState,
    /// True for the first event since the last activity on the axis.
    pub first: bool,
}

/// Windows for each idle axis. A zero window disables the axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Maximum time without an inbound message.
    pub read: Duration,
    /// Maximum time without a successful write.
    pub write: Duration,
    /// Maximum time without either.
    pub all: Duration,
}

impl IdleConfig {
    /// Configuration with all three windows set explicitly.
    #[must_use]
    pub const fn new(read: Duration, write: Duration, all: Duration) -> Self {
        Self { read, write, all }
    }

    /// Only the combined axis, as used for heartbeats.
    #[must_use]
    pub const fn all_idle(window: Duration) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, window)
    }

    /// Window configured for `axis`.
    #[must_use]
    pub fn window(&self, axis: IdleAxis) -> Duration {
        match axis {
            IdleAxis::Read => self.read,
            IdleAxis::Write => self.write,
            IdleAxis::All => self.all,
        }
    }

    /// Returns true if every axis is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool { IdleAxis::AXES.iter().all(|a| self.window(*a).is_zero()) }
}

/// Stage emitting [`IdleStateEvent`]s.
///
/// Place it after the framing stages so it observes decoded traffic, and
/// before any stage that reacts to idle events.
#[derive(Debug)]
pub struct IdleMonitor {
    config: IdleConfig,
    last_read: Instant,
    last_write: Instant,
    pending: [Option<TimerKey>; 3],
    first: [bool; 3],
    started: bool,
}

impl IdleMonitor {
    /// Create a monitor with the given windows.
    #[must_use]
    pub fn new(config: IdleConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            last_read: now,
            last_write: now,
            pending: [None; 3],
            first: [true; 3],
            started: false,
        }
    }

    /// The configured windows.
    #[must_use]
    pub fn config(&self) -> &IdleConfig { &self.config }

    fn arm(&mut self, ctx: &StageContext<'_>, axis: IdleAxis, delay: Duration) {
        if let Some(key) = self.pending[axis.index()].take() {
            ctx.timer().cancel(key);
        }
        let key = ctx.timer().schedule(ctx.connection_id(), axis, delay);
        self.pending[axis.index()] = Some(key);
    }

    fn last_activity(&self, axis: IdleAxis) -> Instant {
        match axis {
            IdleAxis::Read => self.last_read,
            IdleAxis::Write => self.last_write,
            IdleAxis::All => self.last_read.max(self.last_write),
        }
    }

    fn on_tick(&mut self, ctx: &mut StageContext<'_>, axis: IdleAxis) {
        let window = self.config.window(axis);
        if !self.started || window.is_zero() {
            return;
        }
        let elapsed = Instant::now().saturating_duration_since(self.last_activity(axis));
        if elapsed < window {
            self.arm(ctx, axis, window - elapsed);
            return;
        }
        self.arm(ctx, axis, window);
        let first = std::mem::replace(&mut self.first[axis.index()], false);
        tracing::debug!(connection = %ctx.connection_id(), ?axis, first, "connection idle");
        ctx.fire_event(PipelineEvent::Idle(IdleStateEvent {
            state: axis.into(),
            first,
        }));
    }

    fn record_read(&mut self) {
        self.last_read = Instant::now();
        self.first[IdleAxis::Read.index()] = true;
        self.first[IdleAxis::All.index()] = true;
    }

    fn record_write(&mut self) {
        self.last_write = Instant::now();
        self.first[IdleAxis::Write.index()] = true;
        self.first[IdleAxis::All.index()] = true;
    }
}

impl Stage for IdleMonitor {
    fn on_connect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        let now = Instant::now();
        self.last_read = now;
        self.last_write = now;
        for axis in IdleAxis::AXES {
            let window = self.config.window(axis);
            if !window.is_zero() {
                self.arm(ctx, axis, window);
            }
        }
        Ok(())
    }

    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        self.record_read();
        ctx.fire_read(msg);
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut StageContext<'_>, event: PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::IdleTick(axis) => self.on_tick(ctx, axis),
            other => ctx.fire_event(other),
        }
        Ok(())
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        ctx.write(msg)?;
        self.record_write();
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut StageContext<'_>) {
        for key in self.pending.iter_mut().filter_map(Option::take) {
            ctx.timer().cancel(key);
        }
        self.started = false;
    }
}

/// Payload [`Heartbeat`] sends by default.
pub const DEFAULT_HEARTBEAT: &[u8] = b"HEARTBEAT";

/// Stage writing a heartbeat whenever the connection goes idle.
///
/// A failed heartbeat write closes the connection. Other events pass
/// through.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    payload: Bytes,
}

impl Heartbeat {
    /// Heartbeat sending `payload`.
    #[must_use]
    pub fn new(payload: Bytes) -> Self { Self { payload } }

    /// The payload written on idle.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }
}

impl Default for Heartbeat {
    fn default() -> Self { Self::new(Bytes::from_static(DEFAULT_HEARTBEAT)) }
}

impl Stage for Heartbeat {
    fn on_event(&mut self, ctx: &mut StageContext<'_>, event: PipelineEvent) -> Result<()> {
        if event.as_idle().is_none() {
            ctx.fire_event(event);
            return Ok(());
        }
        if let Err(err) = ctx.write(Message::new(self.payload.clone())) {
            tracing::warn!(
                connection = %ctx.connection_id(),
                error = %err,
                "heartbeat write failed, closing connection"
            );
            ctx.close();
        }
        Ok(())
    }
}
