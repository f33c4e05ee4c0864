//! Core traits for connecting to a remote host and running commands on it.

use std::{error::Error as StdError, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ConnectionConfig;

/// Output of one remote command.
///
/// A non-zero exit code is data, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code; 0 when the transport reported none.
    pub exit_code: i32,
}

impl CommandResult {
    /// Create a result from its parts.
    #[must_use]
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Build a result from raw output, defaulting a missing exit code to 0.
    #[must_use]
    pub fn from_output(stdout: &[u8], stderr: &[u8], exit_code: Option<i32>) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            exit_code: exit_code.unwrap_or(0),
        }
    }

    /// Whether the command exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a transport failure should be treated by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection is gone or unusable; a fresh connection may succeed.
    Connection,
    /// The command could not be dispatched for any other reason.
    Execution,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Execution => f.write_str("execution"),
        }
    }
}

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Transport error carrying its classification and the underlying cause.
#[derive(Debug, Error)]
#[error("{kind} failure: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Create an error with an explicit kind.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Connection-classified error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, message)
    }

    /// Execution-classified error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Execution, message)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Whether the failure stems from losing the connection.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        self.kind == TransportErrorKind::Connection
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An established connection to the remote host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command line and collect its output.
    async fn exec(&mut self, command: &str) -> Result<CommandResult, TransportError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake and authentication.
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn missing_exit_code_defaults_to_success() {
        let result = CommandResult::from_output(b"up 3 days\n", b"", None);
        assert_eq!(result.exit_code, 0);
        assert!(result.success());
        assert_eq!(result.stdout, "up 3 days\n");
    }

    #[test]
    fn non_zero_exit_code_is_kept() {
        let result = CommandResult::from_output(b"", b"no such file\n", Some(2));
        assert_eq!(result.exit_code, 2);
        assert!(!result.success());
        assert_eq!(result.stderr, "no such file\n");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let result = CommandResult::from_output(&[0x66, 0xff, 0x6f], b"", Some(0));
        assert_eq!(result.stdout, "f\u{fffd}o");
    }

    #[test]
    fn error_keeps_kind_and_source() {
        let err = TransportError::connection("channel closed")
            .with_source(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));

        assert!(err.is_connection());
        assert_eq!(err.kind(), TransportErrorKind::Connection);
        assert_eq!(err.to_string(), "connection failure: channel closed");
        let source = StdError::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("broken pipe"));
    }

    #[test]
    fn execution_errors_are_not_connection_errors() {
        let err = TransportError::execution("bad request");
        assert!(!err.is_connection());
        assert!(StdError::source(&err).is_none());
    }

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn exec(&mut self, command: &str) -> Result<CommandResult, TransportError> {
            Ok(CommandResult::new(command, "", 0))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transport_is_object_safe() {
        let mut transport: Box<dyn Transport> = Box::new(EchoTransport);
        let result = assert_ok!(transport.exec("uptime").await);
        assert_eq!(result.stdout, "uptime");
        assert_ok!(transport.close().await);
    }
}
