//! Transport implementations for the session manager.
//!
//! Provides:
//! - SSH connector and transport (feature: ssh)
//! - Structured classification of SSH errors into connection/execution kinds

#[cfg(feature = "ssh")]
pub mod ssh;

#[cfg(feature = "ssh")]
pub use ssh::{SshConnector, SshTransport, classify_error};
