//! Session management for a single remote host.
//!
//! Provides:
//! - `SessionManager` - Owns the connection, reconnects with backoff, retries once
//! - `SessionError` - Configuration, connection, execution and exhaustion failures
//! - `SessionState` - Observable lifecycle state

pub mod error;
pub mod manager;

pub use error::SessionError;
pub use manager::{SessionManager, SessionState};
