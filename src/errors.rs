//! Error types for the spindle engine.
//!
//! Three kinds of failure move through the engine: protocol contract
//! violations (fatal, the round cannot continue), forced stops (cooperative
//! cancellation, not a failure), and soft rejections (handled locally by the
//! state machine and never surfaced as an error).

use crate::critical_data::CriticalDataScope;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Root error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The foundation broke its side of the protocol contract, e.g. an
    /// expected response never arrived or an outcome carried two risk
    /// awards. Fatal for the current round.
    #[error("foundation protocol violation: {0}")]
    ProtocolViolation(String),

    /// Critical-data read/write/remove failure.
    #[error(transparent)]
    CriticalData(#[from] CriticalDataError),

    /// A foundation transaction could not be opened or closed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Configuration loading or validation failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The game-logic adapter reported a fault.
    #[error("game logic fault: {0}")]
    Logic(String),

    /// A shutdown was requested while the engine was mid-step. Not a
    /// failure: the round loop unwinds cleanly, runs the adapter's
    /// deinitialization hook and exits.
    #[error("stop forced")]
    StopForced,
}

impl EngineError {
    /// True when the error is the cooperative stop signal rather than a
    /// genuine failure.
    pub fn is_stop(&self) -> bool {
        matches!(self, EngineError::StopForced)
    }
}

/// Critical-data access errors.
#[derive(Debug, Error)]
pub enum CriticalDataError {
    #[error("critical data store open failed: {0}")]
    Open(String),

    #[error("critical data read failed at {scope:?}:{path}: {reason}")]
    Read {
        scope: CriticalDataScope,
        path: String,
        reason: String,
    },

    #[error("critical data write failed at {scope:?}:{path}: {reason}")]
    Write {
        scope: CriticalDataScope,
        path: String,
        reason: String,
    },

    /// A write was attempted outside an open transaction. Every durable
    /// mutation must happen inside one.
    #[error("no open transaction for critical data write to {scope:?}:{path}")]
    NoTransaction {
        scope: CriticalDataScope,
        path: String,
    },

    /// The scope is not writable through the requested access path.
    #[error("access to scope {scope:?} denied: {reason}")]
    AccessDenied {
        scope: CriticalDataScope,
        reason: String,
    },

    /// A persisted record failed to decode.
    #[error("corrupted critical data at {scope:?}:{path}: {reason}")]
    Corrupted {
        scope: CriticalDataScope,
        path: String,
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
