//! Per-connection stage chains.
//!
//! A [`Pipeline`] is an ordered sequence of named [`Stage`]s. Inbound bytes
//! and events enter at the head and travel towards the tail; writes enter at
//! the writing stage and travel towards the head, where bytes are handed to
//! the [`Transport`]. All entry points run on the connection's own sequential
//! context, so stages never observe concurrent calls.
//!
//! Stages may be added, removed or replaced at any time, including by the
//! running stage itself. The next stage is resolved at the moment a message
//! is forwarded, so an edit takes effect for the remainder of the current
//! dispatch.
//!
//! Closing is deferred until the outermost dispatch returns. Teardown then
//! removes the connection from its broadcast groups, notifies every stage
//! and, for a locally initiated close, asks the transport to close once.

mod context;
mod event;
mod stage;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use bytes::Bytes;

pub use self::{context::StageContext, event::PipelineEvent, stage::Stage};
use crate::{
    error::{PipelineError, Result},
    idle::IdleAxis,
    message::Message,
    metrics,
    recovery::{DefaultRecoveryPolicy, Direction, ErrorContext, RecoveryPolicy, RecoveryPolicyHook},
    session::{ConnectionHandle, ConnectionId, Mailbox, MailboxEvent},
    timer::{NoopTimer, Timer},
    transport::Transport,
};

/// Default capacity of a connection's mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Identifier of a stage, unique within its pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageId(u64);

/// Lifecycle of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Built but not yet connected.
    Registered,
    /// Connected and processing traffic.
    Active,
    /// Closed locally; waiting for the I/O layer to confirm.
    Closing,
    /// Closed.
    Closed,
}

struct StageSlot {
    id: StageId,
    name: Arc<str>,
    // Empty while the stage is running.
    stage: Option<Box<dyn Stage>>,
    connected: bool,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    recovery: Arc<dyn RecoveryPolicyHook>,
    mailbox_capacity: usize,
    stages: Vec<(String, Box<dyn Stage>)>,
}

impl PipelineBuilder {
    /// Connection the pipeline will serve.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId { self.id }

    /// Use `timer` for idle ticks.
    #[must_use]
    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Use `hook` to decide how faults are handled.
    #[must_use]
    pub fn recovery(mut self, hook: Arc<dyn RecoveryPolicyHook>) -> Self {
        self.recovery = hook;
        self
    }

    /// Bound the connection's mailbox to `capacity` messages.
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, name: impl Into<String>, stage: impl Stage) -> Self {
        self.stages.push((name.into(), Box::new(stage)));
        self
    }

    /// Append a stage through a mutable reference.
    pub fn push_stage(&mut self, name: impl Into<String>, stage: impl Stage) -> &mut Self {
        self.stages.push((name.into(), Box::new(stage)));
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if two stages share a
    /// name.
    pub fn build(self) -> Result<Pipeline> {
        let (handle, mailbox) = ConnectionHandle::new(self.id, self.mailbox_capacity);
        let mut pipeline = Pipeline {
            id: self.id,
            slots: Vec::with_capacity(self.stages.len()),
            next_stage_id: 0,
            state: PipelineState::Registered,
            depth: 0,
            connecting: false,
            close_requested: false,
            peer_closed: false,
            transport: self.transport,
            timer: self.timer,
            recovery: self.recovery,
            handle,
            mailbox: Some(mailbox),
        };
        for (name, stage) in self.stages {
            pipeline.insert(pipeline.slots.len(), &name, stage)?;
        }
        Ok(pipeline)
    }
}

/// Ordered chain of stages serving one connection.
pub struct Pipeline {
    id: ConnectionId,
    slots: Vec<StageSlot>,
    next_stage_id: u64,
    state: PipelineState,
    depth: usize,
    // Set while `on_connect` sweeps the stages.
    connecting: bool,
    close_requested: bool,
    peer_closed: bool,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    recovery: Arc<dyn RecoveryPolicyHook>,
    handle: ConnectionHandle,
    mailbox: Option<Mailbox>,
}

impl Pipeline {
    /// Start building a pipeline for `id` writing through `transport`.
    pub fn builder(id: ConnectionId, transport: Arc<dyn Transport>) -> PipelineBuilder {
        PipelineBuilder {
            id,
            transport,
            timer: Arc::new(NoopTimer),
            recovery: Arc::new(DefaultRecoveryPolicy),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            stages: Vec::new(),
        }
    }

    /// Connection this pipeline serves.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState { self.state }

    /// Returns true while the pipeline accepts traffic and no close is
    /// pending.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.close_requested
            && matches!(self.state, PipelineState::Registered | PipelineState::Active)
    }

    /// Handle other connections use to address this one.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle { self.handle.clone() }

    /// Take the mailbox so an async driver can wait on it.
    ///
    /// Once taken, [`Pipeline::drain_mailbox`] does nothing.
    pub fn take_mailbox(&mut self) -> Option<Mailbox> { self.mailbox.take() }

    /// Names of the stages in head-to-tail order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.name.to_string()).collect()
    }

    /// Returns true if a stage called `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.find(name).is_some() }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize { self.slots.len() }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    /// The connection became active: notify every stage head to tail.
    pub fn on_connect(&mut self) {
        if self.state != PipelineState::Registered {
            return;
        }
        self.state = PipelineState::Active;
        metrics::inc_connections();
        tracing::debug!(connection = %self.id, stages = self.slots.len(), "pipeline active");
        self.enter();
        self.connecting = true;
        // Rescan after every call: a stage may add or remove stages
        // (itself included) while connecting.
        while self.is_open() {
            let Some(index) = self.slots.iter().position(|slot| !slot.connected) else {
                break;
            };
            self.slots[index].connected = true;
            let _ = self.invoke(index, Direction::Inbound, |stage, ctx| stage.on_connect(ctx));
        }
        self.connecting = false;
        self.exit();
    }

    /// Bytes arrived from the I/O layer.
    pub fn on_data(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.enter();
        self.dispatch_read(0, Message::new(bytes));
        self.exit();
    }

    /// A timer scheduled for `axis` fired.
    pub fn on_idle_tick(&mut self, axis: IdleAxis) {
        self.fire_event(PipelineEvent::IdleTick(axis));
    }

    /// Dispatch `event` from the head.
    pub fn fire_event(&mut self, event: PipelineEvent) {
        self.enter();
        self.dispatch_event(0, event);
        self.exit();
    }

    /// Write `msg` from the tail towards the head.
    ///
    /// # Errors
    ///
    /// Returns the first failure raised by a stage or the transport, or
    /// [`PipelineError::Closed`] after teardown.
    pub fn write(&mut self, msg: Message) -> Result<()> {
        self.enter();
        let result = self.dispatch_write(self.slots.len(), msg);
        self.exit();
        result
    }

    /// Write every message queued on the mailbox and honour a pending close
    /// request. Returns the number of messages written successfully.
    pub fn drain_mailbox(&mut self) -> usize {
        let mut written = 0;
        while let Some(event) = self.mailbox.as_mut().and_then(Mailbox::try_recv) {
            match event {
                MailboxEvent::Message(msg) => {
                    if self.write(msg).is_ok() {
                        written += 1;
                    }
                }
                MailboxEvent::Close => {
                    self.close();
                    break;
                }
            }
        }
        written
    }

    /// Close the connection locally.
    ///
    /// Deferred until the outermost dispatch returns; the transport is asked
    /// to close exactly once.
    pub fn close(&mut self) {
        self.close_requested = true;
        if self.depth == 0 {
            self.teardown(PipelineState::Closing);
        }
    }

    /// The I/O layer reports that the connection is gone.
    pub fn on_close(&mut self) {
        self.close_requested = true;
        self.peer_closed = true;
        if self.depth == 0 {
            self.teardown(PipelineState::Closed);
        }
    }

    /// Insert a stage at the head.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken.
    pub fn add_first(&mut self, name: &str, stage: impl Stage) -> Result<StageId> {
        self.insert(0, name, Box::new(stage))
    }

    /// Append a stage at the tail.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken.
    pub fn add_last(&mut self, name: &str, stage: impl Stage) -> Result<StageId> {
        self.insert(self.slots.len(), name, Box::new(stage))
    }

    /// Insert a stage immediately before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken or
    /// `anchor` is missing.
    pub fn add_before(&mut self, anchor: &str, name: &str, stage: impl Stage) -> Result<StageId> {
        let index = self.require(anchor)?;
        self.insert(index, name, Box::new(stage))
    }

    /// Insert a stage immediately after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken or
    /// `anchor` is missing.
    pub fn add_after(&mut self, anchor: &str, name: &str, stage: impl Stage) -> Result<StageId> {
        let index = self.require(anchor)?;
        self.insert(index + 1, name, Box::new(stage))
    }

    /// Remove the stage called `name`.
    ///
    /// Removing a missing stage does nothing. A stage removed while it is
    /// running is dropped when it returns, so `None` is returned for it.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Stage>> {
        let index = self.find(name)?;
        self.remove_at(index)
    }

    /// Remove the stage identified by `id`.
    pub fn remove_by_id(&mut self, id: StageId) -> Option<Box<dyn Stage>> {
        let index = self.position(id)?;
        self.remove_at(index)
    }

    /// Replace the stage called `name` with `stage`, registered as
    /// `new_name`, at the same position.
    ///
    /// Returns the previous stage, or `None` if it was running; a running
    /// stage finishes its current call and is then dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is missing
    /// or `new_name` is taken by another stage.
    pub fn replace(
        &mut self,
        name: &str,
        new_name: &str,
        stage: impl Stage,
    ) -> Result<Option<Box<dyn Stage>>> {
        let index = self.require(name)?;
        if new_name != name && self.contains(new_name) {
            return Err(duplicate(new_name));
        }
        let old = self.remove_at(index);
        self.insert(index, new_name, Box::new(stage))?;
        Ok(old)
    }

    pub(crate) fn position(&self, id: StageId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| &*slot.name == name)
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.find(name)
            .ok_or_else(|| PipelineError::invalid_config(format!("no stage named `{name}`")))
    }

    fn insert(&mut self, index: usize, name: &str, stage: Box<dyn Stage>) -> Result<StageId> {
        if self.contains(name) {
            return Err(duplicate(name));
        }
        let id = StageId(self.next_stage_id);
        self.next_stage_id += 1;
        self.slots.insert(
            index.min(self.slots.len()),
            StageSlot {
                id,
                name: Arc::from(name),
                stage: Some(stage),
                connected: false,
            },
        );
        // During the connect sweep the sweep itself picks the stage up.
        if self.state == PipelineState::Active && self.is_open() && !self.connecting {
            self.enter();
            if let Some(index) = self.position(id) {
                self.slots[index].connected = true;
                let _ = self.invoke(index, Direction::Inbound, |stage, ctx| stage.on_connect(ctx));
            }
            self.exit();
        }
        Ok(id)
    }

    fn remove_at(&mut self, index: usize) -> Option<Box<dyn Stage>> {
        let StageSlot { id, name, stage, .. } = self.slots.remove(index);
        let mut stage = stage?;
        if self.is_open() {
            self.enter();
            let mut ctx = StageContext::new(self, id, name, index);
            stage.on_close(&mut ctx);
            self.exit();
        }
        Some(stage)
    }

    fn enter(&mut self) { self.depth += 1; }

    fn exit(&mut self) {
        self.depth -= 1;
        if self.depth == 0 && self.close_requested {
            let target = if self.peer_closed {
                PipelineState::Closed
            } else {
                PipelineState::Closing
            };
            self.teardown(target);
        }
    }

    fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&index| self.slots[index].stage.is_some())
    }

    fn prev_occupied(&self, before: usize) -> Option<usize> {
        (0..before.min(self.slots.len()))
            .rev()
            .find(|&index| self.slots[index].stage.is_some())
    }

    pub(crate) fn dispatch_read(&mut self, from: usize, msg: Message) {
        if !self.is_open() {
            return;
        }
        match self.next_occupied(from) {
            Some(index) => {
                let _ = self.invoke(index, Direction::Inbound, |stage, ctx| stage.on_read(ctx, msg));
            }
            None => tracing::debug!(
                connection = %self.id,
                message = msg.type_name(),
                "inbound message reached the tail and was discarded"
            ),
        }
    }

    pub(crate) fn dispatch_event(&mut self, from: usize, event: PipelineEvent) {
        if !self.is_open() {
            return;
        }
        match self.next_occupied(from) {
            Some(index) => {
                let _ = self.invoke(index, Direction::Inbound, |stage, ctx| {
                    stage.on_event(ctx, event)
                });
            }
            None => tracing::trace!(connection = %self.id, ?event, "event reached the tail"),
        }
    }

    pub(crate) fn dispatch_write(&mut self, before: usize, msg: Message) -> Result<()> {
        if matches!(self.state, PipelineState::Closing | PipelineState::Closed) {
            return Err(PipelineError::Closed);
        }
        match self.prev_occupied(before) {
            Some(index) => {
                self.invoke(index, Direction::Outbound, |stage, ctx| stage.on_write(ctx, msg))
            }
            None => self.write_to_transport(msg),
        }
    }

    fn write_to_transport(&mut self, msg: Message) -> Result<()> {
        let bytes = match msg.downcast::<Bytes>() {
            Ok(bytes) => bytes,
            Err(msg) => match msg.downcast::<Vec<u8>>() {
                Ok(vec) => Bytes::from(vec),
                Err(msg) => {
                    let err = PipelineError::UnsupportedMessage {
                        stage: "head".to_string(),
                        type_name: msg.type_name(),
                    };
                    self.fault(&err, "head", Direction::Outbound, false);
                    return Err(err);
                }
            },
        };
        let result = self.transport.write(self.id, bytes);
        if result.is_ok() {
            metrics::inc_frames(Direction::Outbound);
        }
        result
    }

    /// Run one hook of the stage at `index`.
    ///
    /// The stage is taken out of its slot for the duration of the call and
    /// put back afterwards unless it was removed or replaced meanwhile.
    fn invoke<F>(&mut self, index: usize, direction: Direction, hook: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Stage, &mut StageContext<'_>) -> Result<()>,
    {
        let Some(slot) = self.slots.get_mut(index) else {
            return Ok(());
        };
        let Some(mut stage) = slot.stage.take() else {
            return Ok(());
        };
        let id = slot.id;
        let name = Arc::clone(&slot.name);

        let mut ctx = StageContext::new(self, id, Arc::clone(&name), index);
        let result = hook(stage.as_mut(), &mut ctx);
        let forwarded_failure = ctx.forwarded_failure();
        let non_fatal = stage.non_fatal();

        match self.slots.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => slot.stage = Some(stage),
            None => {
                if self.is_open() {
                    let index = index.min(self.slots.len());
                    let mut ctx = StageContext::new(self, id, Arc::clone(&name), index);
                    stage.on_close(&mut ctx);
                }
                tracing::trace!(connection = %self.id, stage = %name, "removed stage retired");
            }
        }

        let Err(err) = result else {
            return Ok(());
        };
        if !(direction == Direction::Outbound && forwarded_failure) {
            self.fault(&err, &name, direction, non_fatal);
        }
        Err(err)
    }

    fn fault(&mut self, err: &PipelineError, stage: &str, direction: Direction, non_fatal: bool) {
        metrics::inc_faults(err.error_type());
        let policy = if non_fatal {
            tracing::warn!(
                connection = %self.id,
                stage,
                error = %err,
                "non-fatal stage fault, message dropped"
            );
            RecoveryPolicy::Drop
        } else {
            let ctx = ErrorContext {
                connection_id: self.id,
                stage: stage.to_string(),
                direction,
            };
            self.recovery.recovery_policy(err, &ctx)
        };
        if policy == RecoveryPolicy::Disconnect {
            self.close_requested = true;
        }
    }

    fn teardown(&mut self, target: PipelineState) {
        match self.state {
            PipelineState::Closed => return,
            PipelineState::Closing => {
                if target == PipelineState::Closed {
                    self.state = PipelineState::Closed;
                }
                return;
            }
            PipelineState::Registered | PipelineState::Active => {}
        }
        let was_active = self.state == PipelineState::Active;
        self.state = target;
        let groups = self.handle.mark_closed();
        if let Some(mailbox) = self.mailbox.as_mut() {
            mailbox.close();
        }

        self.depth += 1;
        for index in 0..self.slots.len() {
            let Some(slot) = self.slots.get_mut(index) else {
                break;
            };
            let (id, name) = (slot.id, Arc::clone(&slot.name));
            let Some(mut stage) = slot.stage.take() else {
                continue;
            };
            let mut ctx = StageContext::new(self, id, name, index);
            stage.on_close(&mut ctx);
            if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
                slot.stage = Some(stage);
            }
        }
        self.depth -= 1;

        if target == PipelineState::Closing {
            self.transport.close(self.id);
        }
        if was_active {
            metrics::dec_connections();
        }
        tracing::debug!(connection = %self.id, state = ?target, groups, "pipeline closed");
    }
}

fn duplicate(name: &str) -> PipelineError {
    PipelineError::invalid_config(format!("duplicate stage name `{name}`"))
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stages", &self.names())
            .finish_non_exhaustive()
    }
}
