//! Error types for the pipeline core.
//!
//! [`PipelineError`] is the single error surface shared by frame extractors,
//! codec stages, the pipeline dispatcher and broadcast groups. Each variant
//! carries a default [`RecoveryPolicy`] describing whether the failure is
//! fatal for the connection that produced it.
//!
//! # Error Categories
//!
//! - [`PipelineError::InvalidConfiguration`]: rejected constructor arguments. Raised before a
//!   pipeline exists, so it never reaches a fault handler.
//! - [`PipelineError::FrameTooLarge`]: an extractor exceeded its size cap.
//! - [`PipelineError::UnsupportedMessage`]: a terminal stage saw a message type it cannot handle.
//! - [`PipelineError::EncodingOverflow`]: a value does not fit the declared wire width.
//! - [`PipelineError::MalformedFrame`]: frame bytes could not be interpreted.
//! - [`PipelineError::WriteFailure`]: the transport refused a write for one connection.
//! - [`PipelineError::Closed`]: the connection is no longer accepting work.
//! - [`PipelineError::Io`]: an I/O error surfaced through a `tokio_util` codec.

use std::io;

use thiserror::Error;

use crate::{recovery::RecoveryPolicy, session::ConnectionId};

/// Top-level error type for the pipeline core.
///
/// # Examples
///
/// ```
/// use pipeframe::{PipelineError, RecoveryPolicy};
///
/// let err = PipelineError::FrameTooLarge { size: 2048, max: 1024 };
/// assert_eq!(err.default_recovery_policy(), RecoveryPolicy::Disconnect);
/// assert!(err.should_disconnect());
/// ```
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Constructor arguments were rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Human-readable description of the rejected argument.
        reason: String,
    },

    /// Buffered bytes exceeded the extractor's configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    FrameTooLarge {
        /// Number of bytes buffered or declared by a length prefix.
        size: usize,
        /// Maximum number of bytes the extractor accepts.
        max: usize,
    },

    /// A terminal stage received a message it does not understand.
    #[error("stage `{stage}` cannot handle message of type {type_name}")]
    UnsupportedMessage {
        /// Name of the stage, or a codec description, that rejected the message.
        stage: String,
        /// Type name of the rejected message.
        type_name: &'static str,
    },

    /// A numeric value does not fit the declared wire width.
    #[error("value {value} does not fit in {width} bits")]
    EncodingOverflow {
        /// Value that failed to encode.
        value: i128,
        /// Width of the target representation in bits.
        width: u32,
    },

    /// Frame bytes could not be interpreted by a decoder.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Description of the decoding failure.
        reason: String,
    },

    /// The transport refused a write.
    #[error("write to {connection} failed: {reason}")]
    WriteFailure {
        /// Connection the write was addressed to.
        connection: ConnectionId,
        /// Description of the failure.
        reason: String,
    },

    /// The connection is closing or closed.
    #[error("connection closed")]
    Closed,

    /// I/O error reported through a `tokio_util` codec.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Build an [`PipelineError::InvalidConfiguration`] from any displayable reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Build a [`PipelineError::MalformedFrame`] from any displayable reason.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Build a [`PipelineError::WriteFailure`] for `connection`.
    pub fn write_failure(connection: ConnectionId, reason: impl Into<String>) -> Self {
        Self::WriteFailure {
            connection,
            reason: reason.into(),
        }
    }

    /// Returns the recommended recovery policy for this error.
    ///
    /// | Error | Policy |
    /// |-------|--------|
    /// | `WriteFailure` | `Drop` |
    /// | everything else | `Disconnect` |
    ///
    /// Write failures are reported to whoever issued the write and are only
    /// fatal where a caller decides so (for example the heartbeat stage).
    #[must_use]
    pub fn default_recovery_policy(&self) -> RecoveryPolicy {
        match self {
            Self::WriteFailure { .. } => RecoveryPolicy::Drop,
            Self::InvalidConfiguration { .. }
            | Self::FrameTooLarge { .. }
            | Self::UnsupportedMessage { .. }
            | Self::EncodingOverflow { .. }
            | Self::MalformedFrame { .. }
            | Self::Closed
            | Self::Io(_) => RecoveryPolicy::Disconnect,
        }
    }

    /// Returns true if the default policy terminates the connection.
    #[must_use]
    pub fn should_disconnect(&self) -> bool {
        self.default_recovery_policy() == RecoveryPolicy::Disconnect
    }

    /// Returns the error category as a string for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::UnsupportedMessage { .. } => "unsupported_message",
            Self::EncodingOverflow { .. } => "encoding_overflow",
            Self::MalformedFrame { .. } => "malformed_frame",
            Self::WriteFailure { .. } => "write_failure",
            Self::Closed => "closed",
            Self::Io(_) => "io",
        }
    }
}

/// Canonical result alias used by the pipeline core.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::too_large(PipelineError::FrameTooLarge { size: 9, max: 8 }, RecoveryPolicy::Disconnect)]
    #[case::unsupported(
        PipelineError::UnsupportedMessage { stage: "tail".into(), type_name: "u8" },
        RecoveryPolicy::Disconnect
    )]
    #[case::overflow(PipelineError::EncodingOverflow { value: 70_000, width: 16 }, RecoveryPolicy::Disconnect)]
    #[case::write(PipelineError::write_failure(ConnectionId::new(3), "reset"), RecoveryPolicy::Drop)]
    #[case::io(PipelineError::Io(io::Error::other("boom")), RecoveryPolicy::Disconnect)]
    fn default_policies(#[case] err: PipelineError, #[case] expected: RecoveryPolicy) {
        assert_eq!(err.default_recovery_policy(), expected);
    }

    #[test]
    fn display_includes_context() {
        let err = PipelineError::EncodingOverflow {
            value: 70_000,
            width: 16,
        };
        assert_eq!(err.to_string(), "value 70000 does not fit in 16 bits");

        let err = PipelineError::write_failure(ConnectionId::new(7), "mailbox full");
        assert_eq!(
            err.to_string(),
            "write to ConnectionId(7) failed: mailbox full"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: PipelineError = io::Error::other("reset").into();
        assert_eq!(err.error_type(), "io");
        assert!(err.should_disconnect());
    }
}
