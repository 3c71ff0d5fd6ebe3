//! Failure taxonomy for the render pipeline
//!
//! Nothing here is fatal to the host: every variant degrades to
//! "no chart shown" plus a reported error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure reported for a single render job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The worker runtime or script could not be located or started
    #[error("Render worker unavailable: {message}")]
    WorkerUnavailable { message: String },

    /// The worker process died while a job depended on it
    #[error("Render worker crashed: {message}")]
    WorkerCrashed { message: String },

    /// The job did not finish within its bound
    #[error("Render timed out after {timeout_ms} ms")]
    RenderTimeout { timeout_ms: u64 },

    /// The worker ran but produced no artifact marker
    #[error("Render produced no chart: {message}")]
    RenderEmpty { message: String },

    /// Encode/decode failure or any other unexpected error
    #[error("Render failed: {message}")]
    RenderFailed { message: String },
}

/// Fieldless discriminant of [`RenderError`], for events and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    WorkerUnavailable,
    WorkerCrashed,
    RenderTimeout,
    RenderEmpty,
    RenderFailed,
}

impl RenderError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::WorkerUnavailable {
            message: message.into(),
        }
    }

    pub fn crashed(message: impl Into<String>) -> Self {
        Self::WorkerCrashed {
            message: message.into(),
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::RenderEmpty {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::RenderFailed {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::WorkerUnavailable { .. } => FailureKind::WorkerUnavailable,
            Self::WorkerCrashed { .. } => FailureKind::WorkerCrashed,
            Self::RenderTimeout { .. } => FailureKind::RenderTimeout,
            Self::RenderEmpty { .. } => FailureKind::RenderEmpty,
            Self::RenderFailed { .. } => FailureKind::RenderFailed,
        }
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        Self::failed(format!("job serialization: {}", err))
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        Self::failed(format!("I/O: {}", err))
    }
}
