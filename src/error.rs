//! Error types for linewatch.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition that ended a monitoring run.

use std::io;

use thiserror::Error;

/// Top-level error type for linewatch.
///
/// Clean end-of-input is not an error: `Console::start` returns `Ok(())`.
/// Callback failures never surface here; they are isolated per invocation.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Console is already monitoring")]
    AlreadyRunning,

    #[error("Read error: {0}")]
    Read(#[source] io::Error),

    #[error("Input source is still held by the reader of a stopped run")]
    SourceBusy,

    #[error("Input source is closed")]
    SourceClosed,

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ConsoleError {
    /// Returns true if `start` was refused because a run is already active.
    #[must_use]
    pub const fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning)
    }

    /// Returns true if the run ended on a read failure.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Read(_))
    }

    /// Returns true if calling `start` again may succeed without other changes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            // Busy clears once the parked read returns; a failed spawn leaves
            // the source in place.
            Self::AlreadyRunning | Self::SourceBusy | Self::Spawn { .. } => true,
            Self::Read(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::SourceClosed | Self::InvalidPattern { .. } => false,
        }
    }
}

/// Result type alias for linewatch operations.
pub type ConsoleResult<T> = Result<T, ConsoleError>;
