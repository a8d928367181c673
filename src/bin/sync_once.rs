//! Runs a single sync from the command line (cron, Cloud Scheduler jobs,
//! manual backfills). Prints the JSON response and exits non-zero on failure.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kayzen_campaign_sync::config::Config;
use kayzen_campaign_sync::core::models::SyncResponse;
use kayzen_campaign_sync::core::pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kayzen_campaign_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match Config::from_env() {
        Ok(config) => pipeline::run(&config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => {
            println!("{}", serde_json::to_string(&SyncResponse::from(summary))?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(stage = e.stage(), "❌ Error: {}", e);
            println!("{}", e.body());
            std::process::exit(1);
        }
    }
}
