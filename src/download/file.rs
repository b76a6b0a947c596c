use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use super::paths;
use crate::retry::{self, RetryAction, RetryConfig};

/// What happened to a single media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Fetched and written; carries the number of bytes written.
    Downloaded(u64),
    /// A local file of the expected size already exists.
    Skipped,
}

/// Sibling `.part` path the body is streamed into before the final rename.
fn part_path(download_path: &Path) -> PathBuf {
    let mut name = download_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    download_path.with_file_name(name)
}

/// Download a media file to `download_path`.
///
/// Skips without any request when a local file already has `expected_size`
/// bytes and `overwrite` is off. Otherwise each attempt streams the body to a
/// `.part` file from scratch and renames it into place, retrying with
/// exponential backoff on transport errors and non-200 responses.
pub async fn download_media(
    client: &Client,
    url: &str,
    download_path: &Path,
    expected_size: u64,
    overwrite: bool,
    retry_config: &RetryConfig,
    token: &CancellationToken,
) -> Result<FetchOutcome, DownloadError> {
    if !overwrite && paths::file_matches_size(download_path, expected_size).await {
        tracing::info!(
            path = %download_path.display(),
            size_bytes = expected_size,
            "Skipping file, already exists and matches size"
        );
        return Ok(FetchOutcome::Skipped);
    }

    let part_path = part_path(download_path);

    let result = retry::retry_with_backoff(
        retry_config,
        token,
        |e: &DownloadError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || async {
            let _ = fs::remove_file(&part_path).await;
            attempt_download(client, url, download_path, &part_path).await
        },
    )
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&part_path).await;
    }
    result.map(FetchOutcome::Downloaded)
}

/// Single download attempt. Returns the number of bytes written.
async fn attempt_download(
    client: &Client,
    url: &str,
    download_path: &Path,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let path_str = download_path.display().to_string();
    let response = client.get(url).send().await.map_err(|e| DownloadError::Http {
        source: e,
        path: path_str.clone(),
        bytes_written: 0,
    })?;

    if response.status() != StatusCode::OK {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            path: path_str,
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::Http {
            source: e,
            path: path_str.clone(),
            bytes_written,
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(part_path, download_path).await?;

    Ok(bytes_written)
}
