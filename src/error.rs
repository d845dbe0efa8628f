use thiserror::Error;

use crate::sheet::DocumentError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Backend rejected {endpoint} with HTTP {status}")]
    BackendRejected { endpoint: String, status: u16 },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Write error: {0}")]
    Write(#[from] DocumentError),

    #[error("Gave up after {attempts} poll attempts")]
    TimedOut { attempts: u32 },

    #[error("Poll loop stopped without an answer (state: {state})")]
    PollAborted { state: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`BridgeError`] for callers that branch on
/// the failure instead of only displaying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    BackendRejected,
    MalformedPayload,
    Write,
    TimedOut,
    PollAborted,
    Config,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Network(_) => ErrorKind::Network,
            BridgeError::BackendRejected { .. } => ErrorKind::BackendRejected,
            BridgeError::MalformedPayload(_) => ErrorKind::MalformedPayload,
            BridgeError::Write(_) => ErrorKind::Write,
            BridgeError::TimedOut { .. } => ErrorKind::TimedOut,
            BridgeError::PollAborted { .. } => ErrorKind::PollAborted,
            BridgeError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        BridgeError::MalformedPayload(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
