use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::bigquery::BigQueryWarehouse;
use crate::config::{Config, Credentials};
use crate::errors::SyncError;
use crate::gcp_auth;
use crate::kayzen_client::KayzenClient;
use crate::loader::CampaignLoader;
use crate::models::{format_fetch_timestamp, Campaign, SyncSummary};
use crate::warehouse::Warehouse;

/// Builds the HTTP client shared by every outbound call of one invocation.
pub fn http_client(timeout: Duration) -> Result<Client, SyncError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Runs one invocation: token, all campaign pages, Google token, upsert.
///
/// Each step completes before the next starts. The first failure ends the
/// run. An empty listing ends it successfully before Google is contacted.
pub async fn run(config: &Config) -> Result<SyncSummary, SyncError> {
    let fetched_at = Utc::now();
    tracing::info!("Starting Kayzen campaigns fetch into {}", config.destination);

    let client = http_client(config.http_timeout)?;
    let kayzen = KayzenClient::new(client.clone(), &config.kayzen_base_url, config.page_size);
    let campaigns = fetch_campaigns(&kayzen, &config.credentials).await?;

    if campaigns.is_empty() {
        tracing::info!("No campaigns fetched; destination {} left untouched", config.destination);
        return Ok(SyncSummary {
            campaigns_fetched: 0,
            campaigns_processed: 0,
            fetch_timestamp: format_fetch_timestamp(fetched_at),
        });
    }

    let access_token = gcp_auth::access_token(&client, &config.gcp_credentials).await?;
    let warehouse = BigQueryWarehouse::new(
        client,
        &config.bigquery_base_url,
        access_token,
        config.destination.clone(),
    )
    .with_location(config.bigquery_location.clone())
    .with_job_timeout(config.job_timeout);

    load_campaigns(&warehouse, campaigns, fetched_at).await
}

/// Authenticates and pages through every campaign.
pub async fn fetch_campaigns(
    kayzen: &KayzenClient,
    credentials: &Credentials,
) -> Result<Vec<Campaign>, SyncError> {
    let token = kayzen.acquire_token(credentials).await?;
    kayzen.fetch_all(&token).await
}

/// Upserts the fetched campaigns, stamped with `fetched_at`.
pub async fn load_campaigns(
    warehouse: &dyn Warehouse,
    campaigns: Vec<Campaign>,
    fetched_at: DateTime<Utc>,
) -> Result<SyncSummary, SyncError> {
    let campaigns_fetched = campaigns.len();
    let loader = CampaignLoader::new(warehouse, fetched_at);
    let campaigns_processed = loader.upsert(campaigns).await?;

    tracing::info!(
        "✓ Sync complete: {} fetched, {} loaded at {}",
        campaigns_fetched,
        campaigns_processed,
        loader.fetch_timestamp()
    );

    Ok(SyncSummary {
        campaigns_fetched,
        campaigns_processed,
        fetch_timestamp: loader.fetch_timestamp().to_string(),
    })
}
