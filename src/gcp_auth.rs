//! Google OAuth2 access tokens for the BigQuery REST API.
//!
//! Three sources are supported, picked by [`GcpCredentials`]:
//!
//! - a pre-issued token (emulators, tests),
//! - a service account key, exchanged through a signed RS256 JWT bearer grant,
//! - the instance metadata server available on Cloud Functions / Cloud Run.
//!
//! A token is fetched once per invocation and not cached.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GcpCredentials;
use crate::errors::SyncError;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Fields of a service account JSON key this module needs.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    /// Used as JWT issuer.
    client_email: String,
    /// PEM-encoded RSA key.
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// JWT claims for the OAuth2 JWT bearer grant.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    /// At most one hour after `iat`.
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

/// Resolves an access token with the BigQuery scope.
///
/// Failures are `Load` errors: without a token the destination is unreachable.
pub async fn access_token(client: &Client, credentials: &GcpCredentials) -> Result<String, SyncError> {
    let token = match credentials {
        GcpCredentials::AccessToken(token) => token.clone(),
        GcpCredentials::ServiceAccountJson(json) => {
            service_account_token(client, &parse_key(json)?).await?
        }
        GcpCredentials::ServiceAccountFile(path) => {
            let json = tokio::fs::read_to_string(path).await.map_err(|e| {
                SyncError::Load(format!(
                    "Failed to read service account key {}: {}",
                    path.display(),
                    e
                ))
            })?;
            service_account_token(client, &parse_key(&json)?).await?
        }
        GcpCredentials::MetadataServer { base_url } => metadata_token(client, base_url).await?,
    };

    if token.trim().is_empty() {
        return Err(SyncError::Load("Google returned an empty access token".to_string()));
    }
    Ok(token)
}

fn parse_key(json: &str) -> Result<ServiceAccountKey, SyncError> {
    serde_json::from_str(json)
        .map_err(|e| SyncError::Load(format!("Invalid service account key: {}", e)))
}

async fn service_account_token(client: &Client, key: &ServiceAccountKey) -> Result<String, SyncError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SyncError::Load(format!("System clock before epoch: {}", e)))?
        .as_secs();

    let claims = JwtClaims {
        iss: key.client_email.clone(),
        scope: BIGQUERY_SCOPE.to_string(),
        aud: key.token_uri.clone(),
        iat: now,
        exp: now + 3600,
    };

    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| SyncError::Load(format!("Invalid service account private key: {}", e)))?;
    let jwt = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| SyncError::Load(format!("Failed to sign JWT: {}", e)))?;

    tracing::debug!("Exchanging service account JWT for {}", key.client_email);

    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ])
        .send()
        .await
        .map_err(|e| SyncError::Load(format!("Token exchange request failed: {}", e)))?;

    read_token(response, "Token exchange").await
}

async fn metadata_token(client: &Client, base_url: &str) -> Result<String, SyncError> {
    let url = format!("{}{}", base_url, METADATA_TOKEN_PATH);
    tracing::debug!("Requesting access token from metadata server");

    let response = client
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| SyncError::Load(format!("Metadata server request failed: {}", e)))?;

    read_token(response, "Metadata server").await
}

async fn read_token(response: reqwest::Response, source: &str) -> Result<String, SyncError> {
    if !response.status().is_success() {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(SyncError::Load(format!(
            "{} failed ({}): {}",
            source, status, text
        )));
    }

    let token: GoogleTokenResponse = response.json().await.map_err(|e| {
        SyncError::Load(format!("Failed to parse {} response: {}", source, e))
    })?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_passthrough() {
        let token = access_token(
            &Client::new(),
            &GcpCredentials::AccessToken("ya29.static".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(token, "ya29.static");
    }

    #[tokio::test]
    async fn test_invalid_key_json_is_load_error() {
        let err = access_token(
            &Client::new(),
            &GcpCredentials::ServiceAccountJson("{\"client_email\": 1}".to_string()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.stage(), "load");
    }

    #[tokio::test]
    async fn test_missing_key_file_is_load_error() {
        let err = access_token(
            &Client::new(),
            &GcpCredentials::ServiceAccountFile("/nonexistent/sa.json".into()),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sa.json"));
    }

    #[test]
    fn test_token_uri_defaults() {
        let key = parse_key(r#"{"client_email":"a@b.iam.gserviceaccount.com","private_key":"x"}"#)
            .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }
}
