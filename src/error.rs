//! Unified error types for cmdchk

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cmdchk operations
///
/// Check failures are not errors: a check that cannot be launched or exits
/// with an unaccepted code is reported through its `CheckResult`.
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Error parsing config '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Startup errors
    #[error("Could not drop privileges to {0}: no such user")]
    UnknownUser(String),

    #[error("Could not drop privileges to {user}: {source}")]
    PrivilegeDrop { user: String, source: nix::Error },

    #[error("Could not bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("Could not install logger: {0}")]
    Logger(String),

    #[error("Invalid startup transition: {0}")]
    Startup(String),

    // Supervisor errors
    #[error("Invalid child lifecycle transition: {0}")]
    Lifecycle(String),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn { command: String, source: io::Error },
}

/// Result type alias for cmdchk operations
pub type Result<T> = std::result::Result<T, Error>;
