//! Broadcast groups.
//!
//! A [`BroadcastGroup`] is a named set of connections shared across
//! connection workers. Membership lives in a concurrent map; a broadcast
//! snapshots the members first and then delivers to each one, so members
//! joining or leaving during a broadcast neither break the iteration nor see
//! a partial message. Every recipient receives its own clone of the message,
//! and the caller's copy is released when the broadcast returns.
//!
//! Members that close leave every group they joined exactly once; a member
//! that is already closed cannot be added.

use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Weak},
};

use dashmap::DashMap;

use crate::{
    error::{PipelineError, Result},
    message::Message,
    metrics,
    session::{ConnectionHandle, ConnectionId, Membership},
};

/// Whether a broadcast originating from a member is delivered back to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Deliver to every member, the sender included.
    #[default]
    IncludeSender,
    /// Skip the sender.
    ExcludeSender,
}

/// A recipient of broadcast messages.
pub trait GroupMember<M>: Clone + Send + Sync + 'static {
    /// Identifier of the member's connection.
    fn id(&self) -> ConnectionId;

    /// Deliver `msg` to the member.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WriteFailure`] if the member cannot accept
    /// the message.
    fn deliver(&self, msg: M) -> Result<()>;

    /// Register `group` for removal when the member closes, running
    /// `insert` atomically with the check. Returns false if the member is
    /// already closed.
    fn join(&self, _group: Weak<dyn Membership>, insert: &mut dyn FnMut()) -> bool {
        insert();
        true
    }

    /// Close the member's connection.
    fn close(&self) {}
}

impl<M: Send + 'static> GroupMember<M> for ConnectionHandle {
    fn id(&self) -> ConnectionId { ConnectionHandle::id(self) }

    fn deliver(&self, msg: M) -> Result<()> { self.send(Message::new(msg)) }

    fn join(&self, group: Weak<dyn Membership>, insert: &mut dyn FnMut()) -> bool {
        ConnectionHandle::join(self, group, insert)
    }

    fn close(&self) { ConnectionHandle::close(self); }
}

/// Outcome of a broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Members the message was delivered to.
    pub delivered: Vec<ConnectionId>,
    /// Members the delivery failed for, with the reason.
    pub failures: Vec<(ConnectionId, PipelineError)>,
}

impl BroadcastReport {
    /// Returns true if no delivery failed.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.failures.is_empty() }

    /// Identifiers of the members the delivery failed for.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<ConnectionId> {
        self.failures.iter().map(|(id, _)| *id).collect()
    }
}

struct GroupInner<H> {
    name: String,
    members: DashMap<ConnectionId, H>,
}

impl<H: Send + Sync> Membership for GroupInner<H> {
    fn leave(&self, id: ConnectionId) -> bool { self.members.remove(&id).is_some() }
}

/// Named, concurrently shared set of connections.
///
/// Cloning yields another reference to the same group.
///
/// ```
/// use pipeframe::{BroadcastGroup, ConnectionHandle, ConnectionId};
///
/// let group: BroadcastGroup<String> = BroadcastGroup::new("chat");
/// let (handle, mut mailbox) = ConnectionHandle::new(ConnectionId::new(1), 8);
/// assert!(group.add(handle));
/// let report = group.broadcast("hello".to_string());
/// assert!(report.is_complete());
/// assert!(mailbox.try_recv().is_some());
/// ```
pub struct BroadcastGroup<M, H = ConnectionHandle> {
    inner: Arc<GroupInner<H>>,
    echo: EchoPolicy,
    _marker: PhantomData<fn(M)>,
}

impl<M, H> Clone for BroadcastGroup<M, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            echo: self.echo,
            _marker: PhantomData,
        }
    }
}

impl<M, H> BroadcastGroup<M, H>
where
    M: Clone + Send + 'static,
    H: GroupMember<M>,
{
    /// Create an empty group echoing to the sender.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                members: DashMap::new(),
            }),
            echo: EchoPolicy::default(),
            _marker: PhantomData,
        }
    }

    /// Set the echo policy applied by [`BroadcastGroup::broadcast_from`].
    #[must_use]
    pub fn with_echo_policy(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    /// Name of the group.
    #[must_use]
    pub fn name(&self) -> &str { &self.inner.name }

    /// The configured echo policy.
    #[must_use]
    pub fn echo_policy(&self) -> EchoPolicy { self.echo }

    /// Add `member`. Returns false if it is already present or closed.
    pub fn add(&self, member: H) -> bool {
        let id = member.id();
        if self.inner.members.contains_key(&id) {
            return false;
        }
        let membership: Arc<dyn Membership> = self.inner.clone();
        let mut inserted = false;
        let joined = member.join(Arc::downgrade(&membership), &mut || {
            inserted = self.inner.members.insert(id, member.clone()).is_none();
        });
        let added = joined && inserted;
        if added {
            tracing::debug!(group = %self.inner.name, connection = %id, "member joined");
        }
        added
    }

    /// Remove the member `id`. Returns false if it was absent.
    pub fn remove(&self, id: ConnectionId) -> bool { self.inner.leave(id) }

    /// Returns true if `id` is a member.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool { self.inner.members.contains_key(&id) }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize { self.inner.members.len() }

    /// Returns true if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.inner.members.is_empty() }

    /// Identifiers of the current members, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.members.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Deliver `msg` to every member.
    pub fn broadcast(&self, msg: M) -> BroadcastReport { self.deliver(msg, None) }

    /// Deliver `msg` on behalf of `sender`, honouring the echo policy.
    pub fn broadcast_from(&self, sender: ConnectionId, msg: M) -> BroadcastReport {
        let skip = (self.echo == EchoPolicy::ExcludeSender).then_some(sender);
        self.deliver(msg, skip)
    }

    /// Remove every member and close its connection.
    pub fn close_all(&self) {
        for member in self.snapshot() {
            if self.inner.leave(member.id()) {
                member.close();
            }
        }
    }

    fn snapshot(&self) -> Vec<H> {
        let mut members: Vec<H> = self
            .inner
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_unstable_by_key(|member| member.id());
        members
    }

    fn deliver(&self, msg: M, skip: Option<ConnectionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for member in self.snapshot() {
            let id = member.id();
            if Some(id) == skip {
                continue;
            }
            match member.deliver(msg.clone()) {
                Ok(()) => report.delivered.push(id),
                Err(err) => {
                    metrics::inc_broadcast_failures();
                    tracing::warn!(
                        group = %self.inner.name,
                        connection = %id,
                        error = %err,
                        "broadcast delivery failed"
                    );
                    report.failures.push((id, err));
                }
            }
        }
        report
    }
}

impl<M, H> fmt::Debug for BroadcastGroup<M, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastGroup")
            .field("name", &self.inner.name)
            .field("members", &self.inner.members.len())
            .field("echo", &self.echo)
            .finish()
    }
}
