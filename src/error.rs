//! Error types for the reader client.
//!
//! [`ReaderError`] is the single error type of the library, built with
//! `thiserror`. Its variants separate the failures an operator must tell
//! apart: the server could not be reached, the server refused the lock, a
//! command was issued out of order, or the reader itself reported a
//! failure. The binary wraps these in `anyhow` at its rim.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;

/// Failures surfaced by the session, lock renewal, and readout workflow.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// The transport could not be established within the retry budget.
    /// Carries the last underlying failure.
    #[error("failed to connect to {address} after {attempts} attempt(s): {source}")]
    Connection {
        /// `host:port` of the SiLA2 endpoint.
        address: String,
        /// Number of attempts actually performed.
        attempts: u32,
        /// Last transport-level failure.
        source: tonic::transport::Error,
    },

    /// Lock acquisition was denied, or an unlock failed for a reason other
    /// than the lock not being held.
    #[error("lock {phase} failed: {status}")]
    Lock {
        /// Renewal phase that failed (`"unlock"`, `"acquire"`, `"lease"`).
        phase: &'static str,
        /// Status reported by the server.
        status: tonic::Status,
    },

    /// A workflow command was invoked out of order.
    #[error("{command}: {reason}")]
    Precondition {
        /// The command that was refused.
        command: &'static str,
        /// State-naming explanation of what is missing.
        reason: String,
    },

    /// A caller-supplied value could not be normalized or parsed.
    #[error("invalid value {value:?}: {reason}")]
    Validation {
        /// The offending input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The remote side reported a failure executing a well-ordered command.
    #[error("{command} failed on the reader: {status}")]
    Command {
        /// The command that failed.
        command: &'static str,
        /// Status reported by the server.
        status: tonic::Status,
    },

    /// No response within the per-call deadline.
    #[error("{command} timed out after {deadline:?}")]
    Timeout {
        /// The command that timed out.
        command: &'static str,
        /// The deadline that elapsed.
        deadline: Duration,
    },

    /// The vendor application could not be started.
    #[error("launch failed: {0}")]
    Launch(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Semantically invalid configuration values.
    #[error("configuration validation error: {0}")]
    Configuration(String),

    /// File or terminal I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
