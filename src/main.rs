//! Content Sync - headless watcher
//!
//! Connects to the API's socket, keeps the content, business and user queries
//! fresh, and logs every notice until Ctrl-C. Configured through `SYNC_*`
//! environment variables; log level through `RUST_LOG`.

use std::sync::Arc;

use content_sync::cache::{CacheInvalidator, QueryCache};
use content_sync::connection::SocketClient;
use content_sync::notify::{LogNotices, NotificationPresenter};
use content_sync::rest::RestClient;
use content_sync::{Result, SyncConfig, SyncContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SyncConfig::from_env();
    let client = Arc::new(SocketClient::new(config.clone())?);
    tracing::info!(
        version = content_sync::VERSION,
        api = %config.api_base_url,
        socket = %client.websocket_url(),
        "starting content sync"
    );

    let cache = Arc::new(QueryCache::new());
    let rest = Arc::new(RestClient::new(&config)?.with_cache(&cache));
    rest.register_queries(&cache);
    let refresher = cache.spawn_auto_refresh();

    let presenter = Arc::new(NotificationPresenter::with_ttl(
        Arc::new(LogNotices),
        config.notice_ttl,
    ));
    let sync = SyncContext::new(client, CacheInvalidator::new(&cache), presenter);
    let connection = sync.init(None);

    let mut states = connection.state_changes();
    let status = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(%state, "connection state");
            if state.is_terminal() {
                break;
            }
        }
    });

    for key in cache.keys() {
        if let Err(e) = cache.get(&key).await {
            tracing::warn!(query = %key, error = %e, "initial load failed");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }

    tracing::info!("shutting down");
    sync.teardown();
    let _ = connection.wait_closed().await;
    status.abort();
    refresher.abort();
    Ok(())
}
