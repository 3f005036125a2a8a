//! Abstraction over the I/O layer that carries bytes for connections.
//!
//! The pipeline never touches sockets. Bytes leaving the head stage are handed
//! to a [`Transport`], and a pipeline close is reported through
//! [`Transport::close`]. [`ChannelTransport`] forwards both onto a Tokio
//! channel for a per-connection writer task.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    error::{PipelineError, Result},
    session::ConnectionId,
};

/// Carries outbound bytes for connections.
pub trait Transport: Send + Sync {
    /// Write `bytes` to `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WriteFailure`] if the bytes cannot be
    /// accepted.
    fn write(&self, connection: ConnectionId, bytes: Bytes) -> Result<()>;

    /// Close `connection`. Called once per pipeline-initiated close.
    fn close(&self, connection: ConnectionId);
}

/// Instruction for a connection's writer task.
#[derive(Debug, PartialEq, Eq)]
pub enum TransportCommand {
    /// Write the bytes to the socket.
    Write(Bytes),
    /// Shut the socket down.
    Close,
}

/// [`Transport`] feeding a single connection's writer task.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn write(&self, connection: ConnectionId, bytes: Bytes) -> Result<()> {
        self.tx
            .send(TransportCommand::Write(bytes))
            .map_err(|_| PipelineError::write_failure(connection, "writer task has stopped"))
    }

    fn close(&self, connection: ConnectionId) {
        if self.tx.send(TransportCommand::Close).is_err() {
            tracing::debug!(%connection, "writer task already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_arrive_in_order() {
        let (transport, mut rx) = ChannelTransport::new();
        let id = ConnectionId::new(1);
        transport
            .write(id, Bytes::from_static(b"a"))
            .expect("receiver alive");
        transport.close(id);
        assert_eq!(
            rx.try_recv().ok(),
            Some(TransportCommand::Write(Bytes::from_static(b"a")))
        );
        assert_eq!(rx.try_recv().ok(), Some(TransportCommand::Close));
    }

    #[test]
    fn write_fails_once_receiver_dropped() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        let err = transport
            .write(ConnectionId::new(2), Bytes::new())
            .expect_err("receiver dropped");
        assert!(matches!(err, PipelineError::WriteFailure { .. }));
    }
}
