//! Error taxonomy for the session engine.

use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced by sessions and the registry.
///
/// Every variant is recoverable from the registry's point of view: a
/// failing call never affects other sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The executable could not be started (missing, not permitted, no
    /// resources for a pty or pipe).
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// Input or a debugger command was submitted after the process closed
    /// its input stream.
    #[error("input stream is closed")]
    ClosedStream,

    /// Unknown or already reclaimed session id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A cursor pointed past the end of the captured output.
    #[error("offset {offset} is past the end of the output ({len} bytes)")]
    InvalidOffset { offset: usize, len: usize },

    /// The registry is at its configured session limit.
    #[error("session limit reached ({max} running)")]
    ResourceExhausted { max: usize },
}

pub type Result<T> = std::result::Result<T, SessionError>;
