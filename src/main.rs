use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kayzen_campaign_sync::api::handlers::{router, AppState};
use kayzen_campaign_sync::config::{server_port, Config};

/// Main entry point for the HTTP trigger.
///
/// Initializes tracing, checks that the configuration resolves, then serves
/// the sync trigger. Configuration is resolved again on every invocation so
/// rotated secrets are picked up without a restart.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kayzen_campaign_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Fail fast on missing settings
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");
    tracing::info!("Destination table: {}", config.destination);

    let app = router(Arc::new(AppState::from_env()));

    let addr = format!("0.0.0.0:{}", server_port()?);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
