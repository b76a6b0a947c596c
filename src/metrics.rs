//! Download metrics and their Prometheus endpoint.
//!
//! Every [`DownloadMetrics`] owns its own registry, so tests and concurrent
//! runs never share counters. Recording never fails and callers never branch
//! on it; only construction and serving return errors.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Kind of object a download counter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Album,
    Image,
    Video,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Album, ObjectKind::Image, ObjectKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Album => "album",
            ObjectKind::Image => "image",
            ObjectKind::Video => "video",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one kind's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes: u64,
}

/// Download counters shared by the orchestrator and its album tasks.
pub struct DownloadMetrics {
    registry: Registry,
    attempted: IntCounterVec,
    succeeded: IntCounterVec,
    failed: IntCounterVec,
    skipped: IntCounterVec,
    bytes: IntCounterVec,
    duration: HistogramVec,
    size: HistogramVec,
    in_flight: IntGauge,
    peak_in_flight: AtomicUsize,
}

impl std::fmt::Debug for DownloadMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadMetrics")
            .field("in_flight", &self.in_flight.get())
            .field("peak_in_flight", &self.peak_in_flight())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let c = IntCounterVec::new(Opts::new(name, help), &["type"])?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn histogram(
    registry: &Registry,
    name: &str,
    help: &str,
    buckets: Vec<f64>,
) -> prometheus::Result<HistogramVec> {
    let h = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), &["type"])?;
    registry.register(Box::new(h.clone()))?;
    Ok(h)
}

impl DownloadMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let attempted = counter(
            &registry,
            "downloads_attempted_total",
            "Downloads started, by type",
        )?;
        let succeeded = counter(&registry, "downloads_total", "The total number of downloads")?;
        let failed = counter(
            &registry,
            "download_errors_total",
            "The total number of download errors",
        )?;
        let skipped = counter(
            &registry,
            "downloads_skipped_total",
            "Downloads skipped because a local copy already exists",
        )?;
        let bytes = counter(&registry, "downloaded_bytes_total", "Bytes written to disk")?;
        let duration = histogram(
            &registry,
            "download_duration_seconds",
            "The duration of downloads in seconds",
            exponential_buckets(0.1, 2.0, 10)?,
        )?;
        let size = histogram(
            &registry,
            "download_size_bytes",
            "The size of downloads in bytes",
            exponential_buckets(1024.0, 2.0, 10)?,
        )?;
        let in_flight = IntGauge::new(
            "album_downloads_in_flight",
            "Album downloads currently running",
        )?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            attempted,
            succeeded,
            failed,
            skipped,
            bytes,
            duration,
            size,
            in_flight,
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn record_attempt(&self, kind: ObjectKind) {
        self.attempted.with_label_values(&[kind.as_str()]).inc();
    }

    /// A file written to disk: counts it, its bytes, duration and size.
    pub fn record_success(&self, kind: ObjectKind, bytes: u64, elapsed: Duration) {
        let label = [kind.as_str()];
        self.succeeded.with_label_values(&label).inc();
        self.bytes.with_label_values(&label).inc_by(bytes);
        self.size.with_label_values(&label).observe(bytes as f64);
        self.duration
            .with_label_values(&label)
            .observe(elapsed.as_secs_f64());
    }

    /// A finished album. Albums have a duration but no size of their own.
    pub fn record_album(&self, elapsed: Duration) {
        let label = [ObjectKind::Album.as_str()];
        self.succeeded.with_label_values(&label).inc();
        self.duration
            .with_label_values(&label)
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_failure(&self, kind: ObjectKind) {
        self.failed.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_skip(&self, kind: ObjectKind) {
        self.skipped.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn duration_samples(&self, kind: ObjectKind) -> u64 {
        self.duration
            .with_label_values(&[kind.as_str()])
            .get_sample_count()
    }

    pub fn size_samples(&self, kind: ObjectKind) -> u64 {
        self.size
            .with_label_values(&[kind.as_str()])
            .get_sample_count()
    }

    /// Mark an album task as running. The returned guard decrements on drop.
    pub fn enter_album(&self) -> InFlightGuard<'_> {
        self.in_flight.inc();
        let now = usize::try_from(self.in_flight.get()).unwrap_or(0);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }

    pub fn in_flight(&self) -> usize {
        usize::try_from(self.in_flight.get()).unwrap_or(0)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, kind: ObjectKind) -> KindSnapshot {
        let label = [kind.as_str()];
        KindSnapshot {
            attempted: self.attempted.with_label_values(&label).get(),
            succeeded: self.succeeded.with_label_values(&label).get(),
            failed: self.failed.with_label_values(&label).get(),
            skipped: self.skipped.with_label_values(&label).get(),
            bytes: self.bytes.with_label_values(&label).get(),
        }
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Emit one summary line per object kind.
    pub fn log_summary(&self) {
        for kind in ObjectKind::ALL {
            let s = self.snapshot(kind);
            tracing::info!(
                kind = kind.as_str(),
                attempted = s.attempted,
                succeeded = s.succeeded,
                failed = s.failed,
                skipped = s.skipped,
                bytes = s.bytes,
                "download totals"
            );
        }
        tracing::debug!(peak_in_flight = self.peak_in_flight(), "album concurrency");
    }
}

pub struct InFlightGuard<'a> {
    metrics: &'a DownloadMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.dec();
    }
}

async fn metrics_handler(State(metrics): State<Arc<DownloadMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

pub fn metrics_router(metrics: Arc<DownloadMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve `GET /metrics` on `listener` until `token` is cancelled.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<DownloadMetrics>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    tracing::debug!("Metrics server stopped");
    Ok(())
}

/// Bind `addr` and spawn the metrics server in the background.
pub async fn spawn_metrics_server(
    addr: SocketAddr,
    metrics: Arc<DownloadMetrics>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Serving metrics at /metrics");
    tokio::spawn(async move {
        if let Err(e) = serve_metrics(listener, metrics, token).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });
    Ok(())
}
