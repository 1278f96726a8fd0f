//! # Run commands as another user
//!
//! This crate demotes a privileged process to an unprivileged user's
//! identity, runs a command under that identity with a reconstructed
//! environment, and streams the command's combined stdout/stderr
//! line-by-line to a caller-supplied logging sink. It also carries a
//! convenience helper for delivering desktop notifications into a
//! user's session bus.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use thiserror::Error;

pub mod cancel;
pub mod cli;
pub mod notify;
pub mod runner;
pub mod users;

/// An error resolving a user or launching a command.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("user '{0}' not found in the system user database")]
    UserLookup(String),
    #[error("could not launch '{command}' as user '{user}': {source}")]
    Launch {
        user: String,
        command: String,
        source: std::io::Error,
    },
    #[error("malformed command line {0:?}")]
    InvalidCommand(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The type of Result.
pub type Result<T> = std::result::Result<T, Error>;
