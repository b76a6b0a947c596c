//! kidsnoter-rs: mirror kidsnote.com photo albums to local storage.
//!
//! Logs in with account credentials, enumerates the children on the
//! account, then streams each child's album listing into a bounded pool of
//! album downloads. Every album becomes a directory holding its images, its
//! video and a `description.md` with the album text.

#![warn(clippy::all)]

mod auth;
mod cli;
mod config;
mod download;
mod kidsnote;
mod metrics;
mod retry;
mod shutdown;
mod types;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{ChildArgs, Command};
use download::error::DownloadError;
use download::Downloader;
use kidsnote::{Child, ChildSelector, Lister};
use metrics::DownloadMetrics;

/// Pick the children a command should cover. No selection means all of them.
fn select_children(children: &[Child], args: &ChildArgs) -> anyhow::Result<Vec<Child>> {
    let found = match (args.child_id, args.child_name.as_deref()) {
        (None, None) => return Ok(children.to_vec()),
        (Some(id), _) => children.iter().find(|c| c.id == id),
        (None, Some(name)) => children.iter().find(|c| c.name == name),
    };
    match found {
        Some(child) => Ok(vec![child.clone()]),
        None => anyhow::bail!(
            "Couldn't find the given child, check `kidsnoter-rs list-children` for valid IDs and names"
        ),
    }
}

/// Map a child selection onto the downloader's selector.
fn selector_for(children: &[Child], selected: &[Child]) -> ChildSelector {
    match selected {
        [only] if children.len() > 1 => ChildSelector::Id(only.id),
        _ => ChildSelector::All,
    }
}

fn resolve_password(config: &config::Config) -> anyhow::Result<String> {
    if let Some(pw) = &config.password {
        return Ok(pw.clone());
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("No password given; set --password or KIDSNOTER_PASSWORD");
    }
    tokio::task::block_in_place(|| rpassword::prompt_password("kidsnote Password: "))
        .context("Failed to read password")
}

async fn run_list_children(lister: &Lister, token: &CancellationToken) -> anyhow::Result<()> {
    let children = lister.list_children(token).await?;
    for child in &children {
        println!(
            "{} [{}], date of birth: {}, center: {}, class: {}",
            child.name, child.id, child.date_of_birth, child.center_id, child.class_id
        );
    }
    Ok(())
}

async fn run_list_albums(
    lister: &Lister,
    token: &CancellationToken,
    args: &ChildArgs,
) -> anyhow::Result<()> {
    let children = lister.list_children(token).await?;
    for child in select_children(&children, args)? {
        println!("Listing albums for {} (ID: {})", child.name, child.id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let child_id = child.id;
        let listing = {
            let lister = lister.clone();
            let token = token.clone();
            tokio::spawn(async move {
                lister
                    .list_albums(&token, ChildSelector::Id(child_id), tx)
                    .await
            })
        };

        let mut count = 0usize;
        while let Some(album) = rx.recv().await {
            println!("ID [{}], on {}, \"{}\"", album.id, album.created, album.title);
            count += 1;
        }
        listing
            .await
            .context("Album listing task failed")?
            .with_context(|| format!("Error listing albums for {}", child.name))?;

        println!("\nTotal of {} albums for {}\n", count, child.name);
    }
    Ok(())
}

/// Shared state of the download commands.
struct DownloadContext<'a> {
    lister: &'a Lister,
    session: &'a auth::Session,
    config: &'a config::Config,
    metrics: &'a Arc<DownloadMetrics>,
}

/// One full download pass. Returns the number of files that failed.
async fn download_pass(
    ctx: &DownloadContext<'_>,
    token: &CancellationToken,
    selector: ChildSelector,
    album_dir: &Path,
    overwrite: bool,
) -> Result<usize, DownloadError> {
    let downloader = Downloader::new(
        ctx.lister.clone(),
        ctx.session,
        ctx.config.download_config(overwrite),
        Arc::clone(ctx.metrics),
    );
    let result = downloader.download_albums(token, selector, album_dir).await;
    downloader.metrics().log_summary();
    result.map(|summary| summary.failed_files)
}

/// Exit status of a `download-albums` run. Anything short of a complete
/// mirror, including an interrupted one, is a failure.
fn download_outcome(result: Result<usize, DownloadError>) -> anyhow::Result<()> {
    match result {
        Ok(0) => {
            println!("Albums downloaded successfully");
            Ok(())
        }
        Ok(failed) => anyhow::bail!("{} files failed to download", failed),
        Err(DownloadError::Cancelled) => {
            anyhow::bail!("Download cancelled before completion")
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_download_albums(
    ctx: &DownloadContext<'_>,
    token: &CancellationToken,
    args: &ChildArgs,
    overwrite: bool,
) -> anyhow::Result<()> {
    let album_dir = ctx.config.require_album_dir()?;
    tracing::debug!(overwrite, album_dir = %album_dir.display(), "Starting album download");

    let children = ctx.lister.list_children(token).await?;
    let selected = select_children(&children, args)?;
    let selector = selector_for(&children, &selected);

    download_outcome(download_pass(ctx, token, selector, album_dir, overwrite).await)
}

async fn run_serve(
    ctx: &DownloadContext<'_>,
    token: &CancellationToken,
    overwrite: bool,
    sync_interval: u64,
) -> anyhow::Result<()> {
    let album_dir = ctx.config.require_album_dir()?;
    let interval = Duration::from_secs(sync_interval);
    tracing::info!(interval_secs = sync_interval, "Starting continuous album synchronization");
    tracing::debug!(overwrite, "Serve options");

    loop {
        if token.is_cancelled() {
            break;
        }

        match ctx.lister.list_children(token).await {
            Ok(children) => {
                tracing::info!(children = children.len(), "Synchronizing albums");
                let pass =
                    download_pass(ctx, token, ChildSelector::All, album_dir, overwrite).await;
                match pass {
                    Ok(0) => tracing::info!("Synchronization finished"),
                    Ok(failed) => tracing::warn!(failed, "Synchronization finished with failed files"),
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => tracing::error!(error = %e, "Error during synchronization"),
                }
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => tracing::error!(error = %e, "Error listing children"),
        }

        tracing::info!("Waiting {} seconds...", sync_interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = token.cancelled() => break,
        }
    }

    tracing::info!("Shutdown requested, exiting...");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(&cli)?;
    tracing::debug!(?config, "Loaded configuration");

    let password = resolve_password(&config)?;
    let session = auth::Session::new(config.api.timeout)?;
    auth::login(&session, &config.api, &config.username, &password).await?;

    let lister = Lister::new(
        session.clone(),
        Arc::new(config.api.clone()),
        retry::RetryConfig::default(),
    );
    let shutdown_token = shutdown::install_signal_handler();

    let download_metrics =
        Arc::new(DownloadMetrics::new().context("Failed to register metrics")?);
    if let Some(addr) = cli.metrics_addr {
        let token = shutdown_token.child_token();
        metrics::spawn_metrics_server(addr, Arc::clone(&download_metrics), token)
            .await
            .with_context(|| format!("Failed to start metrics server on {addr}"))?;
    }
    let ctx = DownloadContext {
        lister: &lister,
        session: &session,
        config: &config,
        metrics: &download_metrics,
    };

    match &cli.command {
        Command::ListChildren => run_list_children(&lister, &shutdown_token).await,
        Command::ListAlbums(args) => run_list_albums(&lister, &shutdown_token, args).await,
        Command::DownloadAlbums { child, overwrite } => {
            run_download_albums(&ctx, &shutdown_token, child, *overwrite).await
        }
        Command::Serve {
            overwrite,
            sync_interval,
        } => run_serve(&ctx, &shutdown_token, *overwrite, *sync_interval).await,
    }
}
