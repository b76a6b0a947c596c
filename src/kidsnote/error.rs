use thiserror::Error;

use crate::retry::RetryHalt;

/// Failures talking to the album listing API.
///
/// `is_retryable()` separates transport, status and body-parse problems
/// (worth another attempt, possibly against a healthier replica) from
/// structurally incomplete records and local state errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        source: reqwest::Error,
    },

    #[error("received non-OK HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("failed to parse JSON from {url}: {source}")]
    Parse {
        url: String,
        source: serde_json::Error,
    },

    #[error("unexpected response shape: {0}")]
    DataShape(String),

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("children have not been listed yet, call list_children first")]
    NotReady,

    #[error("child with ID {0} not found")]
    ChildNotFound(i64),

    #[error("album listing cancelled")]
    Cancelled,

    #[error("max retry attempts ({0}) reached")]
    Exhausted(u32),

    #[error("listing task failed: {0}")]
    TaskFailed(String),

    #[error("album listing failed for {} child(ren): {}", .0.len(), join_errors(.0))]
    Partial(Vec<ApiError>),
}

fn join_errors(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { .. } => true,
            ApiError::HttpStatus { .. } => true,
            ApiError::Parse { .. } => true,
            ApiError::DataShape(_) => false,
            ApiError::InvalidUrl { .. } => false,
            ApiError::NotReady => false,
            ApiError::ChildNotFound(_) => false,
            ApiError::Cancelled => false,
            ApiError::Exhausted(_) => false,
            ApiError::TaskFailed(_) => false,
            ApiError::Partial(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ApiError::Cancelled => true,
            ApiError::Partial(errors) => errors.iter().all(ApiError::is_cancelled),
            _ => false,
        }
    }
}

impl From<RetryHalt> for ApiError {
    fn from(halt: RetryHalt) -> Self {
        match halt {
            RetryHalt::Cancelled => ApiError::Cancelled,
            RetryHalt::Exhausted(n) => ApiError::Exhausted(n),
        }
    }
}
