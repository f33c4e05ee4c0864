//! Remote command line construction for tool handlers.
//!
//! Provides:
//! - `CommandBuilder` - Quote a program and its arguments into one shell line
//! - `CommandParts` - Parsed program + args

pub mod command;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
