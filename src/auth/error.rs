use thiserror::Error;

/// Errors establishing a logged-in kidsnote session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed login: {0}")]
    FailedLogin(String),

    #[error("Invalid login response: {0}")]
    InvalidResponse(String),

    #[error("Invalid cookie domain: {0}")]
    InvalidCookieDomain(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
