//! Session error taxonomy.

use std::time::Duration;

use remote_shell_core::{ConfigError, TransportError};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Invalid or missing connection configuration. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// Handshake or transport failure.
    #[error("Connection error: {0}")]
    Connection(#[source] TransportError),
    /// The command could not be run for a non-connection reason.
    #[error("Execution error: {0}")]
    Execution(#[source] TransportError),
    /// Reconnect attempts used up; only an explicit `connect()` recovers.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
    /// The configured command timeout elapsed.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

impl SessionError {
    /// Map a transport error onto the taxonomy by its classification.
    #[must_use]
    pub fn from_transport(err: TransportError) -> Self {
        if err.is_connection() {
            Self::Connection(err)
        } else {
            Self::Execution(err)
        }
    }

    /// Whether this error came from the connection rather than the command.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
