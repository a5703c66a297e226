//! Error types for Resonance

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("corrupt store at {path}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("lock timeout: {operation} waited {waited_ms}ms")]
    LockTimeout { operation: String, waited_ms: u64 },

    #[error("collaborator error in {phase}: {message}")]
    Collaborator { phase: String, message: String },

    #[error("collaborator timeout in {phase} after {timeout_ms}ms")]
    CollaboratorTimeout { phase: String, timeout_ms: u64 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn lock_timeout(operation: impl Into<String>, waited_ms: u64) -> Self {
        Self::LockTimeout {
            operation: operation.into(),
            waited_ms,
        }
    }

    pub fn collaborator(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            phase: phase.into(),
            message: message.into(),
        }
    }

    pub fn collaborator_timeout(phase: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CollaboratorTimeout {
            phase: phase.into(),
            timeout_ms,
        }
    }

    /// Errors after which the process can keep running with degraded state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}
