//! Download engine: consumes the streaming album listing and mirrors each
//! album into its own directory with a fixed number of albums in flight.
//!
//! The listing runs in the background and is never slowed by downloads; the
//! semaphore only gates when an album task starts working. Album failures are
//! collected and reported together once every task has finished.

pub mod error;
pub mod file;
pub mod metadata;
pub mod paths;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use self::error::DownloadError;
use self::file::FetchOutcome;
use crate::auth::Session;
use crate::kidsnote::{Album, ChildSelector, Lister};
use crate::metrics::{DownloadMetrics, ObjectKind};
use crate::retry::RetryConfig;

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) overwrite: bool,
    pub(crate) concurrent_downloads: usize,
    /// Whole-run ceiling; the run is cancelled once it passes.
    pub(crate) deadline: Duration,
    pub(crate) retry: RetryConfig,
    pub(crate) no_progress_bar: bool,
}

/// Totals for one `download_albums` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Albums received from the listing.
    pub albums: usize,
    /// Albums whose directory already existed.
    pub skipped_albums: usize,
    /// Images and videos that failed inside otherwise successful albums.
    pub failed_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlbumOutcome {
    Downloaded { failed_files: usize },
    Skipped,
}

/// State shared by every album task.
struct AlbumWorker {
    client: Client,
    config: DownloadConfig,
    metrics: Arc<DownloadMetrics>,
}

pub struct Downloader {
    lister: Lister,
    worker: Arc<AlbumWorker>,
}

/// Spinner counting processed albums.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} albums {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

impl Downloader {
    pub fn new(
        lister: Lister,
        session: &Session,
        config: DownloadConfig,
        metrics: Arc<DownloadMetrics>,
    ) -> Self {
        Self {
            lister,
            worker: Arc::new(AlbumWorker {
                client: session.client().clone(),
                config,
                metrics,
            }),
        }
    }

    pub fn metrics(&self) -> &Arc<DownloadMetrics> {
        &self.worker.metrics
    }

    /// Mirror every album of the selected children under `output_dir`.
    ///
    /// Requires the lister's children to have been enumerated. Returns
    /// [`DownloadError::AlbumsFailed`] when any album or the listing itself
    /// failed, after all other albums have been processed.
    pub async fn download_albums(
        &self,
        shutdown_token: &CancellationToken,
        selector: ChildSelector,
        output_dir: &Path,
    ) -> Result<DownloadSummary, DownloadError> {
        let config = &self.worker.config;
        let token = shutdown_token.child_token();
        let _cancel_on_exit = token.clone().drop_guard();

        let deadline_token = token.clone();
        let deadline = config.deadline;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(
                        "Download deadline of {}s reached, cancelling",
                        deadline.as_secs()
                    );
                    deadline_token.cancel();
                }
                _ = deadline_token.cancelled() => {}
            }
        });

        tracing::info!(
            %selector,
            directory = %output_dir.display(),
            concurrency = config.concurrent_downloads,
            "Starting album download"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Album>();
        let listing = {
            let lister = self.lister.clone();
            let token = token.clone();
            tokio::spawn(async move { lister.list_albums(&token, selector, tx).await })
        };

        let semaphore = Arc::new(Semaphore::new(config.concurrent_downloads.max(1)));
        let errors: Arc<Mutex<Vec<DownloadError>>> = Arc::new(Mutex::new(Vec::new()));
        let skipped = Arc::new(AtomicUsize::new(0));
        let failed_files = Arc::new(AtomicUsize::new(0));
        let pb = create_progress_bar(config.no_progress_bar);
        let output_dir: Arc<PathBuf> = Arc::new(output_dir.to_path_buf());

        let mut tasks = JoinSet::new();
        let mut albums = 0usize;

        loop {
            let album = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    pb.suspend(|| tracing::info!("Shutdown requested, stopping new album downloads"));
                    break;
                }
                next = rx.recv() => match next {
                    Some(album) => album,
                    None => break,
                },
            };
            albums += 1;

            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);
            let errors = Arc::clone(&errors);
            let skipped = Arc::clone(&skipped);
            let failed_files = Arc::clone(&failed_files);
            let output_dir = Arc::clone(&output_dir);
            let token = token.clone();
            let pb = pb.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                    _ = token.cancelled() => {
                        errors.lock().await.push(DownloadError::Album {
                            album_id: album.id,
                            folder: album.folder_name.clone(),
                            source: Box::new(DownloadError::Cancelled),
                        });
                        return;
                    }
                };
                let _in_flight = worker.metrics.enter_album();
                let started = Instant::now();

                match worker.download_album(&album, &output_dir, &token).await {
                    Ok(AlbumOutcome::Skipped) => {
                        worker.metrics.record_skip(ObjectKind::Album);
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(AlbumOutcome::Downloaded { failed_files: failed }) => {
                        worker.metrics.record_attempt(ObjectKind::Album);
                        worker.metrics.record_album(started.elapsed());
                        failed_files.fetch_add(failed, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker.metrics.record_attempt(ObjectKind::Album);
                        worker.metrics.record_failure(ObjectKind::Album);
                        pb.suspend(|| {
                            tracing::error!(
                                album_id = album.id,
                                folder = %album.folder_name,
                                error = %e,
                                "Album download failed"
                            );
                        });
                        errors.lock().await.push(DownloadError::Album {
                            album_id: album.id,
                            folder: album.folder_name.clone(),
                            source: Box::new(e),
                        });
                    }
                }
                pb.set_message(album.title.clone());
                pb.inc(1);
            });
        }
        drop(rx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                errors
                    .lock()
                    .await
                    .push(DownloadError::Other(anyhow::anyhow!("album task failed: {e}")));
            }
        }

        match listing.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.lock().await.push(DownloadError::Listing(e)),
            Err(e) => errors
                .lock()
                .await
                .push(DownloadError::Other(anyhow::anyhow!("listing task failed: {e}"))),
        }
        pb.finish_and_clear();

        let errors = std::mem::take(&mut *errors.lock().await);
        let summary = DownloadSummary {
            albums,
            skipped_albums: skipped.load(Ordering::Relaxed),
            failed_files: failed_files.load(Ordering::Relaxed),
        };

        if token.is_cancelled() && errors.iter().all(DownloadError::is_cancelled) {
            return Err(DownloadError::Cancelled);
        }
        if !errors.is_empty() {
            return Err(DownloadError::AlbumsFailed(errors));
        }

        tracing::info!(
            albums = summary.albums,
            skipped = summary.skipped_albums,
            failed_files = summary.failed_files,
            "Album download finished"
        );
        Ok(summary)
    }
}

impl AlbumWorker {
    /// Mirror one album: directory, `description.md`, images in order, then
    /// the video. Single file failures are logged and counted, not returned.
    async fn download_album(
        &self,
        album: &Album,
        output_dir: &Path,
        token: &CancellationToken,
    ) -> Result<AlbumOutcome, DownloadError> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let album_dir = paths::album_dir(output_dir, &album.folder_name);
        tracing::info!(
            album_id = album.id,
            title = %album.title,
            path = %album_dir.display(),
            "Downloading album"
        );

        if let Some(parent) = album_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::create_dir(&album_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !self.config.overwrite {
                    tracing::info!(
                        album_id = album.id,
                        title = %album.title,
                        "Skipping album, directory already exists"
                    );
                    return Ok(AlbumOutcome::Skipped);
                }
            }
            Err(e) => return Err(e.into()),
        }

        let outcome =
            metadata::write_album_metadata(album, &album_dir, self.config.overwrite).await?;
        tracing::debug!(album_id = album.id, ?outcome, "Album metadata");

        let mut failed = 0usize;
        for image in &album.images {
            if token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let stem = image.id.to_string();
            if let Err(e) = self
                .fetch_media(
                    ObjectKind::Image,
                    &stem,
                    &image.download_url,
                    image.file_size,
                    &album_dir,
                    token,
                )
                .await
            {
                if e.is_cancelled() {
                    return Err(e);
                }
                tracing::error!(
                    album_id = album.id,
                    image_id = image.id,
                    url = %image.download_url,
                    error = %e,
                    "Error downloading image"
                );
                failed += 1;
            }
        }

        if let Some(video) = &album.video {
            if token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            if let Err(e) = self
                .fetch_media(
                    ObjectKind::Video,
                    "video",
                    &video.download_url,
                    video.file_size,
                    &album_dir,
                    token,
                )
                .await
            {
                if e.is_cancelled() {
                    return Err(e);
                }
                tracing::error!(
                    album_id = album.id,
                    video_id = video.id,
                    error = %e,
                    "Error downloading video"
                );
                failed += 1;
            }
        }

        Ok(AlbumOutcome::Downloaded {
            failed_files: failed,
        })
    }

    /// Download one image or video into `album_dir` as `<stem>.<ext>` and
    /// record it in the metrics.
    async fn fetch_media(
        &self,
        kind: ObjectKind,
        stem: &str,
        url: &str,
        expected_size: u64,
        album_dir: &Path,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let started = Instant::now();
        let result = self
            .save_media(stem, url, expected_size, album_dir, token)
            .await;

        match result {
            Ok(FetchOutcome::Skipped) => {
                self.metrics.record_skip(kind);
                Ok(())
            }
            Ok(FetchOutcome::Downloaded(bytes)) => {
                self.metrics.record_attempt(kind);
                self.metrics.record_success(kind, bytes, started.elapsed());
                tracing::debug!(kind = kind.as_str(), size_bytes = bytes, "Downloaded {}", stem);
                Ok(())
            }
            Err(e) => {
                if !e.is_cancelled() {
                    self.metrics.record_attempt(kind);
                    self.metrics.record_failure(kind);
                }
                Err(e)
            }
        }
    }

    async fn save_media(
        &self,
        stem: &str,
        url: &str,
        expected_size: u64,
        album_dir: &Path,
        token: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError> {
        let url = url.trim_matches('"');
        let ext = paths::extension_from_url(url).map_err(|source| DownloadError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let path = album_dir.join(paths::file_name_with_extension(stem, &ext));
        file::download_media(
            &self.client,
            url,
            &path,
            expected_size,
            self.config.overwrite,
            &self.config.retry,
            token,
        )
        .await
    }
}
