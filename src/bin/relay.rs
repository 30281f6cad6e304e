//! Content Relay - development WebSocket relay
//!
//! Serves `/ws`, `/events` and `/health` until Ctrl-C. Configured through
//! `RELAY_*` environment variables; log level through `RUST_LOG`.

use content_sync::relay::{self, RelayConfig};
use content_sync::Result;
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

    let config = RelayConfig::from_env();
    if config.jwt_secret.is_none() {
        tracing::warn!("RELAY_JWT_SECRET not set, accepting anonymous clients");
    }

    relay::serve(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
    })
    .await
}
