//! Line-based chat room stage.
//!
//! Every connection running a [`ChatRoom`] joins the shared group when it
//! becomes active. Each inbound line is relayed to the group as
//! `[{id}] say: {line}`, and join and leave notices are announced to the
//! other members.
//! The stage expects decoded `String` lines and writes `String`s, so it sits
//! behind a line framer and a UTF-8 codec.

use crate::{
    broadcast::BroadcastGroup,
    error::Result,
    message::Message,
    pipeline::{Stage, StageContext},
};

/// Terminal stage relaying lines between members of a group.
#[derive(Clone, Debug)]
pub struct ChatRoom {
    group: BroadcastGroup<String>,
}

impl ChatRoom {
    /// Chat room backed by `group`.
    #[must_use]
    pub fn new(group: BroadcastGroup<String>) -> Self { Self { group } }

    /// The shared group.
    #[must_use]
    pub fn group(&self) -> &BroadcastGroup<String> { &self.group }
}

impl Stage for ChatRoom {
    fn on_connect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        let id = ctx.connection_id();
        self.group.broadcast(format!("Client {id} joined!"));
        self.group.add(ctx.handle());
        Ok(())
    }

    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        let line = msg.downcast::<String>().map_err(|other| ctx.unsupported(&other))?;
        let id = ctx.connection_id();
        let report = self.group.broadcast_from(id, format!("[{id}] say: {line}"));
        if !report.is_complete() {
            tracing::debug!(
                connection = %ctx.connection_id(),
                failed = ?report.failed_ids(),
                "chat line not delivered to every member"
            );
        }
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut StageContext<'_>) {
        let id = ctx.connection_id();
        self.group.remove(id);
        self.group.broadcast(format!("Client {id} left!"));
    }
}
