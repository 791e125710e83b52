//! Error taxonomy.
//!
//! Only [`ValidationError`] (on explicit submit) and [`NetworkError`] ever
//! reach a user. Superseded requests are dropped silently by the scheduler and
//! corrupted history is read back as empty, so neither has a public error type;
//! they still carry a [`FailureCategory`] for logs and metrics.

use serde::Serialize;

/// Coarse class of a failure, used to name it in inline UI messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Validation,
    Network,
    Aborted,
    StorageCorruption,
    Storage,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Validation => "validation",
            FailureCategory::Network => "network",
            FailureCategory::Aborted => "aborted",
            FailureCategory::StorageCorruption => "storage_corruption",
            FailureCategory::Storage => "storage",
        }
    }
}

/// Draft reservation is not ready to be sent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("guest name is required")]
    MissingGuestName,

    #[error("party size must be between 1 and 20, got {0}")]
    PartySize(u32),

    #[error("children must be at most 10, got {0}")]
    Children(u32),

    #[error("estimated spend per cover must be a non-negative number, got {0}")]
    Spend(f64),
}

impl ValidationError {
    pub fn category(&self) -> FailureCategory {
        FailureCategory::Validation
    }
}

/// Remote prediction service failed. Never retried by this crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("prediction service unreachable: {0}")]
    Transport(String),

    #[error("prediction service returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("invalid response from prediction service: {0}")]
    Decode(String),

    #[error("batch response has {got} predictions for {expected} reservations")]
    BatchMismatch { expected: usize, got: usize },
}

impl NetworkError {
    pub fn category(&self) -> FailureCategory {
        FailureCategory::Network
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NetworkError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            NetworkError::Status {
                status: status.as_u16(),
                detail: e.to_string(),
            }
        } else {
            NetworkError::Transport(e.to_string())
        }
    }
}

/// Persisting the history log failed. Reading never fails this way.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("history write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("history worker failed: {0}")]
    Worker(String),

    #[error("history write produced no record")]
    Empty,
}

impl StorageError {
    pub fn category(&self) -> FailureCategory {
        FailureCategory::Storage
    }
}

/// Failure of a full predict → persist pipeline step.
#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl InsightError {
    pub fn category(&self) -> FailureCategory {
        match self {
            InsightError::Validation(e) => e.category(),
            InsightError::Network(e) => e.category(),
            InsightError::Storage(e) => e.category(),
        }
    }
}
