//! Connection identity, handles and mailboxes.
//!
//! A [`ConnectionHandle`] is the cloneable, thread-safe face of one
//! connection. Other connections (typically through a broadcast group) use it
//! to enqueue outbound messages onto the connection's [`Mailbox`], which is
//! drained on the connection's own sequential context. The handle also tracks
//! the groups the connection joined so closing it removes the connection from
//! each of them exactly once.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{PipelineError, Result},
    message::Message,
};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// A collection a connection can be removed from when it closes.
pub trait Membership: Send + Sync {
    /// Remove `id`, returning true if it was present.
    fn leave(&self, id: ConnectionId) -> bool;
}

#[derive(Default)]
struct HandleState {
    closed: bool,
    memberships: Vec<Weak<dyn Membership>>,
}

struct HandleShared {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
    close: CancellationToken,
    state: Mutex<HandleState>,
}

/// Cloneable handle addressing one connection.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<HandleShared>);

impl ConnectionHandle {
    /// Create a handle and the mailbox it feeds.
    ///
    /// `capacity` bounds the number of queued messages; it is raised to one
    /// if zero.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let close = CancellationToken::new();
        let handle = Self(Arc::new(HandleShared {
            id,
            tx,
            close: close.clone(),
            state: Mutex::new(HandleState::default()),
        }));
        (handle, Mailbox { rx, close })
    }

    /// Identifier of the connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.0.id }

    /// Returns true once the connection has been closed or asked to close.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.lock_state().closed }

    /// Enqueue `msg` for the connection without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WriteFailure`] if the connection is closed
    /// or its mailbox is full.
    pub fn send(&self, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(PipelineError::write_failure(self.id(), "connection closed"));
        }
        self.0.tx.try_send(msg).map_err(|err| match err {
            TrySendError::Full(_) => PipelineError::write_failure(self.id(), "mailbox full"),
            TrySendError::Closed(_) => {
                PipelineError::write_failure(self.id(), "connection closed")
            }
        })
    }

    /// Ask the connection to close.
    ///
    /// The connection leaves every group immediately; the pipeline itself
    /// closes when its driver observes the request.
    pub fn close(&self) {
        self.mark_closed();
        self.0.close.cancel();
    }

    /// Run `insert` and record `group` unless the connection is closed.
    ///
    /// Both happen under the handle's lock, so a concurrent close either
    /// prevents the insertion or observes it and removes the connection.
    pub(crate) fn join(&self, group: Weak<dyn Membership>, insert: &mut dyn FnMut()) -> bool {
        let mut state = self.lock_state();
        if state.closed {
            return false;
        }
        insert();
        state.memberships.retain(|weak| weak.strong_count() > 0);
        if !state.memberships.iter().any(|weak| weak.ptr_eq(&group)) {
            state.memberships.push(group);
        }
        true
    }

    /// Mark the connection closed and leave every group it joined.
    ///
    /// Returns the number of groups the connection was removed from. Later
    /// calls return zero.
    pub(crate) fn mark_closed(&self) -> usize {
        let memberships = {
            let mut state = self.lock_state();
            state.closed = true;
            std::mem::take(&mut state.memberships)
        };
        memberships
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|group| group.leave(self.id()))
            .count()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Item taken from a [`Mailbox`].
#[derive(Debug)]
pub enum MailboxEvent {
    /// A message to write through the pipeline.
    Message(Message),
    /// The connection was asked to close.
    Close,
}

/// Receiving side of a connection's outbound queue.
pub struct Mailbox {
    rx: mpsc::Receiver<Message>,
    close: CancellationToken,
}

impl Mailbox {
    /// Wait for the next queued message or a close request.
    ///
    /// Close requests take priority over queued messages. Returns `None`
    /// once every handle has been dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<MailboxEvent> {
        tokio::select! {
            biased;

            () = self.close.cancelled() => Some(MailboxEvent::Close),
            msg = self.rx.recv() => msg.map(MailboxEvent::Message),
        }
    }

    /// Take the next item without waiting.
    pub fn try_recv(&mut self) -> Option<MailboxEvent> {
        if self.close.is_cancelled() {
            return Some(MailboxEvent::Close);
        }
        self.rx.try_recv().ok().map(MailboxEvent::Message)
    }

    /// Stop accepting new messages; already queued ones remain readable.
    pub fn close(&mut self) { self.rx.close(); }
}
