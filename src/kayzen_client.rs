use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::json;

use crate::config::Credentials;
use crate::errors::SyncError;
use crate::models::{AccessToken, Campaign, CampaignPage, CampaignPageBody, PageMeta, TokenResponse};

/// Client for the Kayzen reporting API: token exchange and campaign listing.
#[derive(Clone)]
pub struct KayzenClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl KayzenClient {
    /// Creates a new `KayzenClient`.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client (carries the request timeout).
    /// * `base_url` - API root including the version segment, without a trailing slash.
    /// * `page_size` - Number of campaigns requested per page.
    pub fn new(client: Client, base_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            page_size,
        }
    }

    /// Exchanges the API key/secret (HTTP Basic) and the user login
    /// (password grant) for a bearer token.
    ///
    /// Exactly one request is made. Any transport failure, non-success
    /// status, unparseable body or empty token is an `Auth` error.
    pub async fn acquire_token(&self, credentials: &Credentials) -> Result<AccessToken, SyncError> {
        let url = format!("{}/authentication/token", self.base_url);
        tracing::info!("Requesting Kayzen access token");

        let body = json!({
            "grant_type": "password",
            "username": credentials.username,
            "password": credentials.password,
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.api_key, Some(&credentials.api_secret))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SyncError::Auth(format!(
                "Kayzen returned {}: {}",
                status, error_text
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("Failed to parse token response: {}", e)))?;

        if token.access_token.trim().is_empty() {
            return Err(SyncError::Auth(
                "Token response contained an empty access_token".to_string(),
            ));
        }

        let expires_at = token
            .expires_in
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));

        tracing::info!("✓ Access token obtained");
        Ok(AccessToken {
            value: token.access_token,
            expires_at,
        })
    }

    /// Fetches a single page of campaigns (1-based page index).
    pub async fn fetch_page(&self, token: &AccessToken, page: u64) -> Result<CampaignPage, SyncError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/campaigns", self.base_url),
            &[
                ("page", page.to_string()),
                ("per_page", self.page_size.to_string()),
            ],
        )
        .map_err(|e| SyncError::Fetch(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Fetching campaigns page {}: {}", page, url);

        let response = self
            .client
            .get(url)
            .bearer_auth(&token.value)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SyncError::Fetch(format!("Request for page {} failed: {}", page, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SyncError::Fetch(format!(
                "Error fetching page {}: Kayzen returned {}: {}",
                page, status, error_text
            )));
        }

        let body: CampaignPageBody = response.json().await.map_err(|e| {
            SyncError::Fetch(format!("Failed to parse page {}: {}", page, e))
        })?;

        let data = body
            .data
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                Campaign::try_from(value).map_err(|e| {
                    SyncError::Fetch(format!("Page {} record {}: {}", page, index, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CampaignPage {
            data,
            meta: body.meta,
        })
    }

    /// Pages through every campaign and returns them all at once.
    ///
    /// Any failing page discards what was accumulated so far.
    pub async fn fetch_all(&self, token: &AccessToken) -> Result<Vec<Campaign>, SyncError> {
        let mut campaigns = Vec::new();
        let mut page: u64 = 1;

        loop {
            let batch = self.fetch_page(token, page).await?;
            let received = batch.data.len();
            campaigns.extend(batch.data);

            tracing::info!(
                "Fetched page {} ({} campaigns, {} so far)",
                page,
                received,
                campaigns.len()
            );

            if is_last_page(
                page,
                received,
                self.page_size,
                batch.meta.as_ref(),
                campaigns.len(),
            ) {
                break;
            }
            page += 1;
        }

        tracing::info!("✓ Fetched {} campaigns in {} requests", campaigns.len(), page);
        Ok(campaigns)
    }
}

/// Decides whether paging stops after `page`.
///
/// An empty page always ends the listing. When the API sends totals they
/// decide: paging ends on the last full page without an extra empty
/// request, and continues past a short page if the totals say more remain
/// (the API capped `per_page`). Without totals a short page is the end.
pub fn is_last_page(
    page: u64,
    received: usize,
    page_size: u32,
    meta: Option<&PageMeta>,
    accumulated: usize,
) -> bool {
    if received == 0 {
        return true;
    }
    let short = received < page_size as usize;

    match meta.and_then(|meta| more_remaining(meta, page, accumulated)) {
        Some(true) => {
            if short {
                tracing::warn!(
                    "Page {} returned {} of {} requested campaigns but more remain; continuing",
                    page,
                    received,
                    page_size
                );
            }
            false
        }
        Some(false) => true,
        None => short,
    }
}

/// `None` when the metadata carries no totals.
fn more_remaining(meta: &PageMeta, page: u64, accumulated: usize) -> Option<bool> {
    let pages_left = meta.total_pages.map(|total| page < total);
    let records_left = meta.total_count.map(|total| (accumulated as u64) < total);
    match (pages_left, records_left) {
        (None, None) => None,
        (pages, records) => Some(pages.unwrap_or(true) && records.unwrap_or(true)),
    }
}
