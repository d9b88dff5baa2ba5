use std::io;

use thiserror::Error;

/// Generic error type
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conflicting configuration fields
    #[error("Conflicting configuration: {0}")]
    ConfigConflict(String),

    /// No trust bundle for the document's trust domain
    #[error("No trust bundle found for trust domain {0}")]
    BundleNotFound(String),

    /// Invalid SPIFFE ID
    #[error("Invalid SPIFFE ID: {0}")]
    InvalidSpiffeId(String),

    /// Child process could not be started
    #[error("Failed to start process: {0}")]
    ProcessStart(String),

    /// Renew signal could not be delivered to the child process
    #[error("Failed to signal process: {0}")]
    SignalDelivery(String),

    /// Malformed command-line argument string
    #[error("Invalid command arguments: {0}")]
    ArgParse(String),

    /// Identity stream error
    #[error("Identity stream error: {0}")]
    Stream(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
