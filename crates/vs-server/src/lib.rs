//! vs-server: HTTP front end for on-demand streaming.
//!
//! Serves DASH and HLS manifests, transcoded or transmuxed segments, and
//! raw file bytes for every locator the storage layer can resolve. A
//! background reaper tears down transcoding sessions nobody has asked for
//! in a while, and shutdown destroys every live session before returning.

pub mod context;
pub mod error;
pub mod media;
pub mod middleware;
pub mod request;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vs_core::config::Config;
use vs_transcode::SessionRegistry;

use crate::context::AppContext;

/// Start the streaming server.
///
/// Returns once a shutdown signal arrives and every transcoding session has
/// been destroyed.
pub async fn start(config: Config) -> vs_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let scratch = &config.streaming.scratch_dir;
    tokio::fs::create_dir_all(scratch).await?;
    tracing::info!("Session scratch directory: {}", scratch.display());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| vs_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let reap_interval = config.streaming.reap_interval();

    let ctx = AppContext::from_config(config);
    for info in ctx.tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let cancel = ctx.shutdown.clone();
    let reaper = tokio::spawn(run_reaper(
        Arc::clone(&ctx.sessions),
        reap_interval,
        cancel.clone(),
    ));

    let sessions = Arc::clone(&ctx.sessions);
    let app = router::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| vs_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Listening on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Wake any request still waiting on a segment, then stop every ffmpeg.
    cancel.cancel();
    sessions.destroy_all().await;
    if let Err(e) = reaper.await {
        tracing::warn!("Session reaper ended abnormally: {e}");
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Periodically destroy sessions that have been idle past the configured
/// timeout and pause those running too far ahead of their clients.
async fn run_reaper(sessions: Arc<SessionRegistry>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = sessions.reap_idle().await;
                if reaped > 0 {
                    tracing::info!(reaped, remaining = sessions.len(), "Reaped idle sessions");
                }
                let throttled = sessions.throttle_ahead().await;
                if throttled > 0 {
                    tracing::debug!(throttled, "Paused sessions ahead of their clients");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
