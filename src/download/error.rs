use thiserror::Error;

use crate::kidsnote::ApiError;
use crate::retry::RetryHalt;

/// Typed download errors enabling retry classification.
///
/// `is_retryable()` separates transport failures and non-200 responses, which
/// the file fetch retries, from local disk errors, bad URLs and cancellation,
/// which surface immediately.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {path}")]
    HttpStatus { status: u16, path: String },

    #[error("HTTP error downloading {path} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        path: String,
        bytes_written: u64,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("invalid download URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("download cancelled")]
    Cancelled,

    #[error("album listing failed: {0}")]
    Listing(#[from] ApiError),

    #[error("album {album_id} ({folder}) failed: {source}")]
    Album {
        album_id: i64,
        folder: String,
        source: Box<DownloadError>,
    },

    #[error("{} album(s) failed: {}", .0.len(), join_errors(.0))]
    AlbumsFailed(Vec<DownloadError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_errors(errors: &[DownloadError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Permanent 4xx and transient 5xx responses are not told apart here; the
    /// retry budget bounds both.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { .. } => true,
            DownloadError::Http { .. } => true,
            DownloadError::Disk(_) => false,
            DownloadError::InvalidUrl { .. } => false,
            DownloadError::Cancelled => false,
            DownloadError::Listing(_) => false,
            DownloadError::Album { .. } => false,
            DownloadError::AlbumsFailed(_) => false,
            DownloadError::Other(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            DownloadError::Cancelled => true,
            DownloadError::Listing(e) => e.is_cancelled(),
            DownloadError::Album { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<RetryHalt> for DownloadError {
    fn from(halt: RetryHalt) -> Self {
        match halt {
            RetryHalt::Cancelled => DownloadError::Cancelled,
            RetryHalt::Exhausted(_) => DownloadError::Other(anyhow::Error::new(halt)),
        }
    }
}
