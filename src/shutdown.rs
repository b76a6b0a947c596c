//! Graceful shutdown.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the returned
//! [`CancellationToken`]; in-flight albums stop at their next file boundary
//! and the run reports what it got through. A second signal exits at once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Exit code used when a second signal forces the process down.
const FORCE_EXIT_CODE: i32 = 130;

/// Install signal handlers and return the root shutdown token.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut extra = unix_signals();

        loop {
            #[cfg(unix)]
            {
                match extra.as_mut() {
                    Some((sigterm, sighup)) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = sigterm.recv() => {}
                            _ = sighup.recv() => {}
                        }
                    }
                    None => {
                        if wait_ctrl_c().await.is_err() {
                            return;
                        }
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if wait_ctrl_c().await.is_err() {
                    return;
                }
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Received shutdown signal, stopping after the current files...");
                tracing::info!("Press Ctrl+C again to force exit");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    });

    token
}

async fn wait_ctrl_c() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C, signal handling disabled");
        e
    })
}

#[cfg(unix)]
fn unix_signals() -> Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)> {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(sigterm), Ok(sighup)) => Some((sigterm, sighup)),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM/SIGHUP, only Ctrl+C will stop the run");
            None
        }
    }
}
