//! SSH transport built on russh.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use remote_shell_core::{
    CommandResult, ConnectionConfig, Connector, Credential, Transport, TransportError,
};
use russh::{
    ChannelMsg, Disconnect,
    client::{self, Handle},
    keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key},
};

/// Interval between keepalive probes on an idle connection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered keepalives before the connection is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Extended data stream carrying stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Classify an SSH error for the session layer.
///
/// Only failures that mean the connection itself is gone are
/// connection-classified; anything else fails fast as an execution error.
#[must_use]
pub fn classify_error(err: russh::Error) -> TransportError {
    let connection_lost = matches!(
        err,
        russh::Error::Disconnect
            | russh::Error::HUP
            | russh::Error::IO(_)
            | russh::Error::SendError
            | russh::Error::ConnectionTimeout
            | russh::Error::KeepaliveTimeout
            | russh::Error::InactivityTimeout
    );
    let message = err.to_string();
    let classified = if connection_lost {
        TransportError::connection(message)
    } else {
        TransportError::execution(message)
    };
    classified.with_source(err)
}

/// Client handler that accepts the server's host key.
///
/// Host keys are not checked against `known_hosts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptHostKey;

impl client::Handler for AcceptHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            algorithm = server_public_key.algorithm().as_str(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

enum AuthMethod<'a> {
    Key(ssh_key::PrivateKey),
    Password(&'a str),
}

/// Opens authenticated SSH sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    client_config: Arc<client::Config>,
}

impl SshConnector {
    /// Create a connector with keepalives enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client_config(client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..client::Config::default()
        })
    }

    /// Create a connector with a custom russh client configuration.
    #[must_use]
    pub fn with_client_config(client_config: client::Config) -> Self {
        Self {
            client_config: Arc::new(client_config),
        }
    }

    async fn handshake(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Handle<AcceptHostKey>, TransportError> {
        let addr = (config.host().to_owned(), config.port());
        let connecting = client::connect(Arc::clone(&self.client_config), addr, AcceptHostKey);

        match config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| {
                    TransportError::connection(format!("handshake timed out after {limit:?}"))
                })?
                .map_err(classify_error),
            None => connecting.await.map_err(classify_error),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        // Load the key before touching the network so a bad path fails fast.
        let method = match config.credential() {
            Credential::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                    TransportError::execution(format!(
                        "cannot load private key {}: {e}",
                        path.display()
                    ))
                    .with_source(e)
                })?;
                AuthMethod::Key(key)
            }
            Credential::Password(password) => AuthMethod::Password(password),
        };

        let mut handle = self.handshake(config).await?;

        let auth = match method {
            AuthMethod::Key(key) => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(classify_error)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        config.username(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(config.username(), password)
                    .await
            }
        }
        .map_err(classify_error)?;

        if !auth.success() {
            return Err(TransportError::execution(format!(
                "{} authentication rejected for {}",
                config.credential().method(),
                config.username()
            )));
        }

        tracing::debug!(
            host = %config.host(),
            port = config.port(),
            username = %config.username(),
            "SSH session authenticated"
        );

        Ok(Box::new(SshTransport { handle }))
    }
}

/// An authenticated SSH session. Each command runs on its own channel.
pub struct SshTransport {
    handle: Handle<AcceptHostKey>,
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(&mut self, command: &str) -> Result<CommandResult, TransportError> {
        if self.handle.is_closed() {
            return Err(TransportError::connection("SSH session is closed"));
        }

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(classify_error)?;
        channel.exec(true, command).await.map_err(classify_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(i32::try_from(exit_status).unwrap_or(i32::MAX));
                }
                _ => {}
            }
        }

        if exit_code.is_none() && self.handle.is_closed() {
            return Err(TransportError::connection(
                "SSH session closed before the command completed",
            ));
        }

        Ok(CommandResult::from_output(&stdout, &stderr, exit_code))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(classify_error)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use remote_shell_core::TransportErrorKind;

    use super::*;

    #[test]
    fn dropped_links_are_connection_errors() {
        for err in [
            russh::Error::Disconnect,
            russh::Error::HUP,
            russh::Error::SendError,
            russh::Error::KeepaliveTimeout,
            russh::Error::IO(io::Error::from(io::ErrorKind::ConnectionReset)),
        ] {
            assert_eq!(classify_error(err).kind(), TransportErrorKind::Connection);
        }
    }

    #[test]
    fn protocol_errors_fail_fast() {
        let err = classify_error(russh::Error::Inconsistent);
        assert_eq!(err.kind(), TransportErrorKind::Execution);
    }

    #[tokio::test]
    async fn unreadable_key_fails_before_connecting() {
        let config = ConnectionConfig::new(
            "203.0.113.1",
            "u",
            Credential::private_key("/nonexistent/id_ed25519"),
        )
        .unwrap();

        let Err(err) = SshConnector::new().connect(&config).await else {
            panic!("connect should fail without a readable key");
        };

        assert_eq!(err.kind(), TransportErrorKind::Execution);
        assert!(err.message().contains("/nonexistent/id_ed25519"));
    }

    /// A loopback port that was just released, so nothing listens on it.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let port = closed_port().await;
        let config = ConnectionConfig::new("127.0.0.1", "u", Credential::password("p"))
            .unwrap()
            .with_port(port)
            .with_connect_timeout(Some(Duration::from_secs(5)));

        let Err(err) = SshConnector::new().connect(&config).await else {
            panic!("nothing should be listening on port {port}");
        };

        assert!(err.is_connection());
    }
}
