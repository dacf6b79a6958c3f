//! Agent error taxonomy.
//!
//! All five kinds surface to clients with the same ERROR-like transport
//! status (except where the depot dictated another); the taxonomy lives
//! in the reason string, which downstream loggers grep on.

use thiserror::Error;

use crate::event::ReplyStatus;

/// Why a query was terminated without success.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The pending queue's byte cap was exceeded.
    #[error("pending event queue overflow")]
    QueueOverflow,

    /// A pending entry's deadline passed while disconnected.
    #[error("pending event queue timeout")]
    QueueTimeout,

    /// The agent has no bound depot.
    #[error("group is in error state")]
    GroupError,

    /// Bulk clear on disconnect, with the caller-supplied reason.
    #[error("{0}")]
    Disconnect(String),

    /// Propagated from the depot; opaque to the agent.
    #[error("{reason}")]
    Protocol { status: ReplyStatus, reason: String },
}

impl AgentError {
    /// Transport status code paired with this error.
    pub fn status(&self) -> ReplyStatus {
        match self {
            AgentError::Protocol { status, .. } => *status,
            _ => ReplyStatus::Error,
        }
    }
}
