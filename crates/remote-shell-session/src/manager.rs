//! Session manager for a single remote host.
//!
//! The manager owns one logical connection. It connects lazily, marks the
//! connection dead on connection-classified failures, reconnects with
//! bounded exponential backoff and retries the interrupted command exactly
//! once on the fresh connection.
//!
//! Connect, reconnect, execute and retry all run under one async mutex, so
//! only one connection attempt is ever in flight and callers are served in
//! arrival order. Observers (`is_connected`, `state`, ...) read a status
//! snapshot that is only written while that mutex is held, and never wait.

use std::sync::{PoisonError, RwLock};

use remote_shell_core::{
    CommandResult, ConnectionConfig, Connector, ReconnectPolicy, Transport, TransportError,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::SessionError;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection has ever been established.
    Uninitialized,
    /// The transport is believed usable.
    Connected,
    /// A connection existed but was closed or lost.
    Disconnected,
    /// Reconnect attempts are exhausted; only an explicit `connect()` recovers.
    Failed,
}

/// Snapshot read by the non-blocking observers.
#[derive(Debug, Default)]
struct Status {
    connected: bool,
    ever_connected: bool,
    failed: bool,
    reconnect_attempts: u32,
    connection_id: Option<Uuid>,
}

/// State guarded by the session lock.
#[derive(Default)]
struct Link {
    transport: Option<Box<dyn Transport>>,
}

/// Session manager for one remote host.
///
/// Share it between callers with an `Arc`; every operation takes `&self`.
pub struct SessionManager<C>
where
    C: Connector,
{
    config: ConnectionConfig,
    connector: C,
    policy: ReconnectPolicy,
    link: Mutex<Link>,
    status: RwLock<Status>,
}

impl<C> SessionManager<C>
where
    C: Connector,
{
    /// Create a new session manager with the default reconnect policy.
    ///
    /// No network activity happens until the first `connect()` or command.
    #[must_use]
    pub fn new(config: ConnectionConfig, connector: C) -> Self {
        Self::with_policy(config, connector, ReconnectPolicy::default())
    }

    /// Create a session manager with a custom reconnect policy.
    #[must_use]
    pub fn with_policy(config: ConnectionConfig, connector: C, policy: ReconnectPolicy) -> Self {
        Self {
            config,
            connector,
            policy,
            link: Mutex::new(Link::default()),
            status: RwLock::new(Status::default()),
        }
    }

    /// Create a session manager from the process environment.
    ///
    /// # Errors
    /// Returns [`SessionError::Configuration`] if the environment does not
    /// describe a valid connection.
    pub fn from_env(connector: C) -> Result<Self, SessionError> {
        Ok(Self::new(ConnectionConfig::from_env()?, connector))
    }

    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Whether the manager believes the connection is usable.
    ///
    /// Advisory only: no network activity is performed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.read_status(|s| s.connected)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.read_status(|s| {
            if s.failed {
                SessionState::Failed
            } else if s.connected {
                SessionState::Connected
            } else if s.ever_connected {
                SessionState::Disconnected
            } else {
                SessionState::Uninitialized
            }
        })
    }

    /// Consecutive reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.read_status(|s| s.reconnect_attempts)
    }

    /// Identifier of the current connection, for log correlation.
    #[must_use]
    pub fn connection_id(&self) -> Option<Uuid> {
        self.read_status(|s| s.connection_id)
    }

    /// Establish the connection.
    ///
    /// A no-op if already connected. Succeeding resets the reconnect
    /// counter and leaves the failed state.
    ///
    /// # Errors
    /// Returns [`SessionError::Connection`] if the handshake fails. No retry
    /// is attempted.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut link = self.link.lock().await;
        if self.is_connected() && link.transport.is_some() {
            tracing::debug!(host = %self.config.host(), "Already connected");
            return Ok(());
        }
        self.connect_locked(&mut link).await
    }

    /// Run a command on the remote host.
    ///
    /// The exit code is returned as data; only transport failures are
    /// errors. A connection-classified failure triggers one reconnect and
    /// exactly one retry of the command.
    ///
    /// # Errors
    /// - [`SessionError::Connection`] if connecting, reconnecting or the
    ///   retried command fails on the connection
    /// - [`SessionError::RetryExhausted`] if the reconnect budget is spent
    /// - [`SessionError::Execution`] for non-connection failures
    /// - [`SessionError::Timeout`] if a command timeout is configured and elapses
    pub async fn execute_command(&self, command: &str) -> Result<CommandResult, SessionError> {
        if command.trim().is_empty() {
            return Err(SessionError::Execution(TransportError::execution(
                "empty command",
            )));
        }

        let mut link = self.link.lock().await;

        if let Some(attempts) = self.read_status(|s| s.failed.then_some(s.reconnect_attempts)) {
            return Err(SessionError::RetryExhausted { attempts });
        }

        if !self.is_connected() || link.transport.is_none() {
            self.connect_locked(&mut link).await?;
        }

        let outcome = self.run_locked(&mut link, command).await;
        match outcome {
            Err(SessionError::Connection(err)) => {
                tracing::warn!(
                    host = %self.config.host(),
                    error = %err,
                    "Connection lost while running command, reconnecting"
                );
                self.discard(&mut link);
                self.reconnect_locked(&mut link).await?;

                let retried = self.run_locked(&mut link, command).await;
                if matches!(retried, Err(SessionError::Connection(_))) {
                    self.discard(&mut link);
                }
                retried
            }
            outcome => outcome,
        }
    }

    /// Close the connection if one is held.
    ///
    /// Idempotent and infallible; close failures are logged.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        if let Some(mut transport) = link.transport.take() {
            if let Err(err) = transport.close().await {
                tracing::warn!(
                    host = %self.config.host(),
                    error = %err,
                    "Error while closing connection"
                );
            }
            tracing::info!(host = %self.config.host(), "Disconnected");
        }
        self.write_status(|s| {
            s.connected = false;
            s.connection_id = None;
        });
    }

    async fn connect_locked(&self, link: &mut Link) -> Result<(), SessionError> {
        self.discard(link);

        tracing::debug!(
            host = %self.config.host(),
            port = self.config.port(),
            username = %self.config.username(),
            auth = self.config.credential().method(),
            "Connecting"
        );

        match self.connector.connect(&self.config).await {
            Ok(transport) => {
                link.transport = Some(transport);
                let id = Uuid::new_v4();
                self.write_status(|s| {
                    s.connected = true;
                    s.ever_connected = true;
                    s.failed = false;
                    s.reconnect_attempts = 0;
                    s.connection_id = Some(id);
                });
                tracing::info!(host = %self.config.host(), connection_id = %id, "Connected");
                Ok(())
            }
            Err(err) => {
                self.write_status(|s| {
                    s.connected = false;
                    s.connection_id = None;
                });
                tracing::warn!(host = %self.config.host(), error = %err, "Connect failed");
                Err(SessionError::Connection(err))
            }
        }
    }

    async fn reconnect_locked(&self, link: &mut Link) -> Result<(), SessionError> {
        let max_attempts = self.policy.max_attempts;
        let attempt = self.write_status(|s| {
            if s.reconnect_attempts >= max_attempts {
                s.failed = true;
                s.connected = false;
                None
            } else {
                s.reconnect_attempts += 1;
                Some(s.reconnect_attempts)
            }
        });

        let Some(attempt) = attempt else {
            tracing::error!(
                host = %self.config.host(),
                attempts = max_attempts,
                "Reconnect attempts exhausted"
            );
            return Err(SessionError::RetryExhausted {
                attempts: max_attempts,
            });
        };

        let delay = self.policy.delay_for(attempt);
        tracing::info!(
            host = %self.config.host(),
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting after backoff"
        );
        tokio::time::sleep(delay).await;

        self.connect_locked(link).await
    }

    async fn run_locked(
        &self,
        link: &mut Link,
        command: &str,
    ) -> Result<CommandResult, SessionError> {
        let Some(transport) = link.transport.as_mut() else {
            return Err(SessionError::Connection(TransportError::connection(
                "no transport",
            )));
        };

        tracing::debug!(host = %self.config.host(), command, "Executing command");

        let exec = transport.exec(command);
        let outcome = match self.config.command_timeout() {
            Some(limit) => tokio::time::timeout(limit, exec)
                .await
                .map_err(|_| SessionError::Timeout(limit))?,
            None => exec.await,
        };

        let result = outcome.map_err(SessionError::from_transport)?;
        tracing::debug!(
            host = %self.config.host(),
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Command finished"
        );
        Ok(result)
    }

    /// Drop a transport believed dead without a close handshake.
    fn discard(&self, link: &mut Link) {
        if link.transport.take().is_some() {
            tracing::debug!(host = %self.config.host(), "Discarded transport");
        }
        self.write_status(|s| {
            s.connected = false;
            s.connection_id = None;
        });
    }

    fn read_status<T>(&self, f: impl FnOnce(&Status) -> T) -> T {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner);
        f(&status)
    }

    fn write_status<T>(&self, f: impl FnOnce(&mut Status) -> T) -> T {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status)
    }
}
