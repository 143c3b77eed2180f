//! Domain error taxonomy for the core subsystem (spec §7).
//! Session-local errors are surfaced to API callers as-is; broadcast-path
//! errors never reach here (they only evict the offending subscription).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("working directory does not exist: {0}")]
    WorkingDirMissing(String),

    #[error("command must not be empty")]
    InvalidCommand,

    #[error("failed to exec child process: {0}")]
    ExecFailed(String),

    #[error("resource exhausted while spawning PTY: {0}")]
    ResourceExhausted(String),

    #[error("session id already in use: {0}")]
    IdCollision(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session has already exited")]
    AlreadyExited,

    #[error("cols and rows must both be positive")]
    InvalidDimensions,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
