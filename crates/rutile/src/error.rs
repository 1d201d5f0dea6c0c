//! Reactor error types.

use thiserror::Error;

/// Result type for reactor operations.
pub type ReactorResult<T> = Result<T, ReactorError>;

/// Errors that can occur while running the reactor.
///
/// Bind failures surface from `init()`. Accept and wait failures are
/// fatal to the thread that hit them and are logged there; other threads
/// keep serving their own sessions. Handler failures never appear here:
/// they are recovered locally by detaching and closing the one offending
/// session.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept a pending connection.
    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    /// The readiness wait itself failed.
    #[error("readiness wait failed: {0}")]
    Wait(std::io::Error),

    /// Failed to spawn a reactor thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),

    /// The server was already shut down; its thread pool cannot be
    /// rebuilt.
    #[error("server has been shut down and cannot be restarted")]
    Stopped,

    /// I/O error while setting up reactor infrastructure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
