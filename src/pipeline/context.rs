//! Per-invocation view of the pipeline handed to a running stage.

use std::sync::Arc;

use super::{Pipeline, PipelineEvent, Stage, StageId};
use crate::{
    error::{PipelineError, Result},
    message::Message,
    session::{ConnectionHandle, ConnectionId},
    timer::Timer,
};

/// Context through which a stage forwards messages and edits its pipeline.
///
/// Positions are resolved when a message is forwarded, not when the stage
/// was entered, so edits made during a dispatch take effect for the rest of
/// that dispatch. A stage that removed itself keeps forwarding from the
/// position it last occupied.
pub struct StageContext<'a> {
    pipeline: &'a mut Pipeline,
    id: StageId,
    name: Arc<str>,
    index: usize,
    forwarded_failure: bool,
}

impl<'a> StageContext<'a> {
    pub(super) fn new(pipeline: &'a mut Pipeline, id: StageId, name: Arc<str>, index: usize) -> Self {
        Self {
            pipeline,
            id,
            name,
            index,
            forwarded_failure: false,
        }
    }

    /// Returns true if an error returned by the stage came from a downstream
    /// write this context forwarded.
    pub(super) fn forwarded_failure(&self) -> bool { self.forwarded_failure }

    /// Connection the pipeline belongs to.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId { self.pipeline.id() }

    /// Name the running stage was registered under.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Identifier of the running stage.
    #[must_use]
    pub fn stage_id(&self) -> StageId { self.id }

    /// Handle other connections can use to address this one.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle { self.pipeline.handle() }

    /// Timer service of the connection.
    #[must_use]
    pub fn timer(&self) -> &dyn Timer { self.pipeline.timer.as_ref() }

    /// Returns false once a close has been requested.
    #[must_use]
    pub fn is_open(&self) -> bool { self.pipeline.is_open() }

    /// Forward an inbound message to the next stage towards the tail.
    pub fn fire_read(&mut self, msg: Message) {
        let from = self.next_index();
        self.pipeline.dispatch_read(from, msg);
    }

    /// Forward an event to the next stage towards the tail.
    pub fn fire_event(&mut self, event: PipelineEvent) {
        let from = self.next_index();
        self.pipeline.dispatch_event(from, event);
    }

    /// Send an outbound message to the next stage towards the head.
    ///
    /// # Errors
    ///
    /// Returns the failure of any earlier stage or of the transport. A stage
    /// may return such an error unchanged; it is not reported as a second
    /// fault.
    pub fn write(&mut self, msg: Message) -> Result<()> {
        let before = self.current_index();
        let result = self.pipeline.dispatch_write(before, msg);
        if result.is_err() {
            self.forwarded_failure = true;
        }
        result
    }

    /// Request that the connection close once the current dispatch unwinds.
    pub fn close(&mut self) { self.pipeline.close(); }

    /// Build the error a terminal stage reports for a message it cannot
    /// handle.
    #[must_use]
    pub fn unsupported(&self, msg: &Message) -> PipelineError {
        PipelineError::UnsupportedMessage {
            stage: self.name.to_string(),
            type_name: msg.type_name(),
        }
    }

    /// Names of the stages in head-to-tail order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> { self.pipeline.names() }

    /// Insert a stage at the head. See [`Pipeline::add_first`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken.
    pub fn add_first(&mut self, name: &str, stage: impl Stage) -> Result<StageId> {
        self.refresh_index();
        self.pipeline.add_first(name, stage)
    }

    /// Append a stage at the tail. See [`Pipeline::add_last`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken.
    pub fn add_last(&mut self, name: &str, stage: impl Stage) -> Result<StageId> {
        self.refresh_index();
        self.pipeline.add_last(name, stage)
    }

    /// Insert a stage before `anchor`. See [`Pipeline::add_before`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken or
    /// `anchor` is missing.
    pub fn add_before(&mut self, anchor: &str, name: &str, stage: impl Stage) -> Result<StageId> {
        self.refresh_index();
        self.pipeline.add_before(anchor, name, stage)
    }

    /// Insert a stage after `anchor`. See [`Pipeline::add_after`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `name` is taken or
    /// `anchor` is missing.
    pub fn add_after(&mut self, anchor: &str, name: &str, stage: impl Stage) -> Result<StageId> {
        self.refresh_index();
        self.pipeline.add_after(anchor, name, stage)
    }

    /// Remove the stage called `name`. See [`Pipeline::remove`].
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Stage>> {
        self.refresh_index();
        self.pipeline.remove(name)
    }

    /// Remove the running stage once it returns.
    ///
    /// Messages it forwards afterwards continue from the position it had.
    pub fn remove_self(&mut self) {
        self.refresh_index();
        self.pipeline.remove_by_id(self.id);
    }

    /// Replace the stage called `name`. See [`Pipeline::replace`].
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
        self.refresh_index();
        self.pipeline.replace(name, new_name, stage)
    }

    fn refresh_index(&mut self) {
        if let Some(index) = self.pipeline.position(self.id) {
            self.index = index;
        }
    }

    fn current_index(&mut self) -> usize {
        self.refresh_index();
        self.index
    }

    fn next_index(&mut self) -> usize {
        match self.pipeline.position(self.id) {
            Some(index) => {
                self.index = index;
                index + 1
            }
            None => self.index,
        }
    }
}
