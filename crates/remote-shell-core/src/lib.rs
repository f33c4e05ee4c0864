//! Core abstractions for resilient remote command execution.
//!
//! This crate provides the building blocks shared by the session manager
//! and its transports:
//! - `ConnectionConfig` - Validated connection settings, loadable from the environment
//! - `ReconnectPolicy` - Bounded exponential backoff constants
//! - `CommandResult` - The `(stdout, stderr, exit_code)` triple
//! - `Connector` and `Transport` traits with structured error classification

pub mod config;
pub mod traits;

pub use config::{ConfigError, ConnectionConfig, Credential, ReconnectPolicy};
pub use traits::{CommandResult, Connector, Transport, TransportError, TransportErrorKind};
