//! Recovery policy types and hooks for pipeline faults.
//!
//! When a stage returns an error the pipeline consults a
//! [`RecoveryPolicyHook`] exactly once for that occurrence:
//!
//! - [`RecoveryPolicy::Drop`]: discard the message being processed and continue.
//! - [`RecoveryPolicy::Disconnect`]: close the connection.
//!
//! Stages that declare themselves non-fatal bypass the hook and always drop.
//!
//! ```
//! use pipeframe::{ErrorContext, PipelineError, RecoveryPolicy, RecoveryPolicyHook};
//!
//! struct Lenient;
//!
//! impl RecoveryPolicyHook for Lenient {
//!     fn recovery_policy(&self, _error: &PipelineError, _ctx: &ErrorContext) -> RecoveryPolicy {
//!         RecoveryPolicy::Drop
//!     }
//! }
//! ```

use crate::{error::PipelineError, session::ConnectionId};

/// Recovery policies for stage errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Discard the in-flight message and keep the connection open.
    Drop,

    /// Close the connection.
    #[default]
    Disconnect,
}

/// Direction of the dispatch during which a fault occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Head-to-tail traversal (reads, events, lifecycle notifications).
    Inbound,
    /// Tail-to-head traversal (writes).
    Outbound,
}

impl Direction {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Structured context passed to the recovery hook.
#[derive(Clone, Debug)]
pub struct ErrorContext {
    /// Connection whose pipeline faulted.
    pub connection_id: ConnectionId,
    /// Name of the stage that raised the error.
    pub stage: String,
    /// Dispatch direction at the time of the fault.
    pub direction: Direction,
}

/// Hook deciding how a pipeline reacts to a stage error.
pub trait RecoveryPolicyHook: Send + Sync {
    /// Choose the policy for `error`.
    fn recovery_policy(&self, error: &PipelineError, ctx: &ErrorContext) -> RecoveryPolicy;
}

/// Default hook: log, then apply [`PipelineError::default_recovery_policy`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRecoveryPolicy;

impl RecoveryPolicyHook for DefaultRecoveryPolicy {
    fn recovery_policy(&self, error: &PipelineError, ctx: &ErrorContext) -> RecoveryPolicy {
        let policy = error.default_recovery_policy();
        match policy {
            RecoveryPolicy::Disconnect => tracing::error!(
                connection = %ctx.connection_id,
                stage = %ctx.stage,
                direction = ctx.direction.as_str(),
                error = %error,
                error_type = error.error_type(),
                "pipeline fault, closing connection"
            ),
            RecoveryPolicy::Drop => tracing::warn!(
                connection = %ctx.connection_id,
                stage = %ctx.stage,
                direction = ctx.direction.as_str(),
                error = %error,
                error_type = error.error_type(),
                "pipeline fault, message dropped"
            ),
        }
        policy
    }
}

impl<F> RecoveryPolicyHook for F
where
    F: Fn(&PipelineError, &ErrorContext) -> RecoveryPolicy + Send + Sync,
{
    fn recovery_policy(&self, error: &PipelineError, ctx: &ErrorContext) -> RecoveryPolicy {
        self(error, ctx)
    }
}
