//! superfetch server entry point.
//!
//! Boots the MCP handler on both stdio and streamable-HTTP transports.
//! Logging goes to stderr so it never interleaves with the JSON-RPC
//! protocol on stdout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use superfetch_client::Fetcher;
use superfetch_core::{AppConfig, ContentCache};
use tracing_subscriber::EnvFilter;

mod handler;
mod http;
mod session;
mod tools;

use handler::{AppState, SuperfetchServer};
use http::RateLimiter;
use session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = Arc::new(AppConfig::load()?);
    tracing::info!(
        port = config.port,
        cache_ttl_secs = config.cache_ttl_secs,
        max_sessions = config.max_sessions,
        "configuration loaded"
    );

    let fetcher = Arc::new(Fetcher::new()?);
    let cache = Arc::new(ContentCache::new(config.cache_enabled, config.cache_ttl(), config.cache_max_keys));
    let sessions = Arc::new(SessionManager::new(config.max_sessions, config.session_ttl()));
    let rate_limiter =
        Arc::new(RateLimiter::new(config.rate_limit_max_requests, Duration::from_millis(config.rate_limit_window_ms)));

    cache.spawn_eviction_loop();
    let idle_cleanup = sessions.spawn_idle_cleanup();
    let rate_limit_cleanup = rate_limiter.spawn_cleanup();

    let state = AppState {
        fetcher,
        cache: Arc::clone(&cache),
        sessions: Arc::clone(&sessions),
        config: Arc::clone(&config),
        rate_limiter,
        started_at: Instant::now(),
    };

    tracing::info!("starting superfetch on stdio transport");
    let stdio_handler = SuperfetchServer::new(state.clone());
    let stdio_server = serve_server(stdio_handler, stdio()).await?;
    relay_cache_updates(Arc::clone(&cache), stdio_server.peer().clone());

    let http_handler = SuperfetchServer::new(state.clone());
    let app = http::build_router(http_handler, state.clone());
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "starting superfetch on streamable-http transport");

    let http_server = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&sessions), idle_cleanup, rate_limit_cleanup));

    tokio::select! {
        result = stdio_server.waiting() => {
            result?;
        }
        result = http_server => {
            result?;
        }
    }

    Ok(())
}

/// Relay cache-update events onto the MCP `notifications/resources/updated`
/// and `notifications/resources/list_changed` channels for as long as the
/// peer connection is alive.
fn relay_cache_updates(cache: Arc<ContentCache>, peer: rmcp::service::Peer<rmcp::service::RoleServer>) {
    tokio::spawn(async move {
        let mut updates = cache.on_cache_update().await;
        while let Some(event) = updates.recv().await {
            let Some(uri) = superfetch_core::cache::to_resource_uri(&event.cache_key) else { continue };
            if peer.notify_resource_updated(rmcp::model::ResourceUpdatedNotificationParam { uri }).await.is_err() {
                break;
            }
            if peer.notify_resource_list_changed().await.is_err() {
                break;
            }
        }
    });
}

/// Stops the rate-limit and session idle-cleanup loops, drains the
/// tracked session map, and arms a 10s force-exit timer before letting
/// `axum::serve`'s own graceful shutdown drain in-flight requests and
/// close the listener. If that drain hangs, the timer kills the
/// process; if it finishes first, `main` returns and the timer task
/// goes with it.
async fn shutdown_signal(
    sessions: Arc<SessionManager>, idle_cleanup: tokio::task::JoinHandle<()>,
    rate_limit_cleanup: tokio::task::JoinHandle<()>,
) {
    wait_for_signal().await;
    tracing::info!("shutdown signal received, draining in-flight requests");

    rate_limit_cleanup.abort();
    idle_cleanup.abort();

    let closed = sessions.close_all().await;
    tracing::info!(count = closed.len(), "closed tracked sessions");

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        tracing::warn!("graceful shutdown exceeded 10s, forcing exit");
        std::process::exit(1);
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else { return };
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
