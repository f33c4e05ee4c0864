//! Connection configuration and reconnect policy.

use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Environment variable names recognised by [`ConnectionConfig::from_env`].
pub mod env {
    pub const HOST: &str = "SSH_HOST";
    pub const PORT: &str = "SSH_PORT";
    pub const USERNAME: &str = "SSH_USERNAME";
    pub const PRIVATE_KEY_PATH: &str = "SSH_PRIVATE_KEY_PATH";
    pub const KEY_PASSPHRASE: &str = "SSH_KEY_PASSPHRASE";
    pub const PASSWORD: &str = "SSH_PASSWORD";
    pub const CONNECT_TIMEOUT_SECS: &str = "SSH_CONNECT_TIMEOUT_SECS";
    pub const COMMAND_TIMEOUT_SECS: &str = "SSH_COMMAND_TIMEOUT_SECS";
}

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing remote host")]
    MissingHost,
    #[error("Missing username")]
    MissingUsername,
    #[error("Missing credential: set a private key path or a password")]
    MissingCredential,
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Authentication material for the remote host.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Private key file, optionally encrypted with a passphrase.
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Plain password.
    Password(String),
}

impl Credential {
    /// Create a key credential without a passphrase.
    #[must_use]
    pub fn private_key(path: impl Into<PathBuf>) -> Self {
        Self::PrivateKey {
            path: path.into(),
            passphrase: None,
        }
    }

    /// Create a password credential.
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    /// Short name of the auth method, safe to log.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::PrivateKey { .. } => "publickey",
            Self::Password(_) => "password",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// Validated connection settings for one remote host.
///
/// Immutable once built: host and username are non-empty and exactly one
/// credential is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    username: String,
    credential: Credential,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Create a configuration on the default port.
    ///
    /// # Errors
    /// Returns error if host or username is blank.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        credential: Credential,
    ) -> Result<Self, ConfigError> {
        let host = host.into().trim().to_string();
        let username = username.into().trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if username.is_empty() {
            return Err(ConfigError::MissingUsername);
        }
        Ok(Self {
            host,
            port: DEFAULT_PORT,
            username,
            credential,
            connect_timeout: None,
            command_timeout: None,
        })
    }

    /// Build from the process environment.
    ///
    /// # Errors
    /// Returns error if a required key is missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    ///
    /// A private key path wins over a password when both are set.
    ///
    /// # Errors
    /// Returns error if a required key is missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get(env::HOST).ok_or(ConfigError::MissingHost)?;
        let username = get(env::USERNAME).ok_or(ConfigError::MissingUsername)?;

        let credential = match (get(env::PRIVATE_KEY_PATH), get(env::PASSWORD)) {
            (Some(path), _) => Credential::PrivateKey {
                path: PathBuf::from(path.trim()),
                passphrase: get(env::KEY_PASSPHRASE),
            },
            (None, Some(password)) => Credential::Password(password),
            (None, None) => return Err(ConfigError::MissingCredential),
        };

        let port = match get(env::PORT) {
            Some(raw) => parse_value(env::PORT, &raw)?,
            None => DEFAULT_PORT,
        };

        let connect_timeout = get(env::CONNECT_TIMEOUT_SECS)
            .map(|raw| parse_secs(env::CONNECT_TIMEOUT_SECS, &raw))
            .transpose()?;
        let command_timeout = get(env::COMMAND_TIMEOUT_SECS)
            .map(|raw| parse_secs(env::COMMAND_TIMEOUT_SECS, &raw))
            .transpose()?;

        let config = Self::new(host, username, credential)?
            .with_port(port)
            .with_connect_timeout(connect_timeout)
            .with_command_timeout(command_timeout);

        tracing::debug!(
            host = %config.host,
            port = config.port,
            username = %config.username,
            auth = config.credential.method(),
            "Loaded connection config from environment"
        );

        Ok(config)
    }

    /// Override the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound the transport handshake.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound every command execution. Unset means no bound.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_value::<u64>(key, raw).map(Duration::from_secs)
}

/// Bounded exponential backoff used between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt; doubles on each further attempt.
    pub base_delay: Duration,
    /// Consecutive attempts allowed before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Default base delay (1s).
    pub const BASE_DELAY: Duration = Duration::from_millis(1000);
    /// Default attempt limit.
    pub const MAX_ATTEMPTS: u32 = 5;

    /// Delay to wait before the given 1-based attempt.
    ///
    /// Attempt 0 is treated as attempt 1. Saturates instead of overflowing.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Self::BASE_DELAY,
            max_attempts: Self::MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn key_path_config_is_accepted() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::HOST, "h"),
            (env::USERNAME, "u"),
            (env::PRIVATE_KEY_PATH, "/k"),
        ]))
        .unwrap();

        assert_eq!(config.host(), "h");
        assert_eq!(config.username(), "u");
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.credential(), &Credential::private_key("/k"));
        assert_eq!(config.command_timeout(), None);
    }

    #[test]
    fn missing_credential_is_rejected() {
        let err = ConnectionConfig::from_lookup(lookup(&[(env::HOST, "h"), (env::USERNAME, "u")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredential);
    }

    #[test]
    fn password_is_the_fallback() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::HOST, "h"),
            (env::USERNAME, "u"),
            (env::PASSWORD, "secret"),
        ]))
        .unwrap();
        assert_eq!(config.credential(), &Credential::password("secret"));
    }

    #[test]
    fn key_wins_over_password() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::HOST, "h"),
            (env::USERNAME, "u"),
            (env::PASSWORD, "secret"),
            (env::PRIVATE_KEY_PATH, "/k"),
            (env::KEY_PASSPHRASE, "pp"),
        ]))
        .unwrap();
        assert_eq!(
            config.credential(),
            &Credential::PrivateKey {
                path: PathBuf::from("/k"),
                passphrase: Some("pp".into()),
            }
        );
    }

    #[test]
    fn blank_host_and_username_are_rejected() {
        let err = ConnectionConfig::from_lookup(lookup(&[
            (env::HOST, "  "),
            (env::USERNAME, "u"),
            (env::PASSWORD, "p"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingHost);

        let err = ConnectionConfig::new("h", "", Credential::password("p")).unwrap_err();
        assert_eq!(err, ConfigError::MissingUsername);
    }

    #[test]
    fn port_and_timeouts_are_parsed() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (env::HOST, "h"),
            (env::USERNAME, "u"),
            (env::PASSWORD, "p"),
            (env::PORT, "2222"),
            (env::CONNECT_TIMEOUT_SECS, "10"),
            (env::COMMAND_TIMEOUT_SECS, "30"),
        ]))
        .unwrap();
        assert_eq!(config.port(), 2222);
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ConnectionConfig::from_lookup(lookup(&[
            (env::HOST, "h"),
            (env::USERNAME, "u"),
            (env::PASSWORD, "p"),
            (env::PORT, "70000"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: env::PORT,
                value: "70000".into(),
            }
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", Credential::password("hunter2"));
        assert!(!rendered.contains("hunter2"));

        let key = Credential::PrivateKey {
            path: PathBuf::from("/k"),
            passphrase: Some("hunter2".into()),
        };
        let rendered = format!("{key:?}");
        assert!(rendered.contains("/k"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| u64::try_from(policy.delay_for(n).as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn backoff_saturates() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for(64) >= policy.delay_for(32));
    }
}
