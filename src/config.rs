use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::SyncError;

pub const DEFAULT_KAYZEN_BASE_URL: &str = "https://api.kayzen.io/v1";
pub const DEFAULT_BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_METADATA_BASE_URL: &str = "http://metadata.google.internal";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

/// Kayzen API credentials. Lives for one invocation and is never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Fully qualified BigQuery table the campaigns are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTable {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl DestinationTable {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Backtick-quoted identifier for use in GoogleSQL statements.
    pub fn sql_identifier(&self) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, self.table)
    }
}

impl fmt::Display for DestinationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Where the Google access token for BigQuery comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum GcpCredentials {
    /// Pre-issued token, used against emulators and in tests.
    AccessToken(String),
    /// Service account key JSON content.
    ServiceAccountJson(String),
    /// Path to a service account key file.
    ServiceAccountFile(PathBuf),
    /// Instance metadata server (Cloud Functions, Cloud Run, GCE).
    MetadataServer { base_url: String },
}

impl fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcpCredentials::AccessToken(_) => write!(f, "AccessToken([REDACTED])"),
            GcpCredentials::ServiceAccountJson(_) => write!(f, "ServiceAccountJson([REDACTED])"),
            GcpCredentials::ServiceAccountFile(path) => {
                write!(f, "ServiceAccountFile({})", path.display())
            }
            GcpCredentials::MetadataServer { base_url } => {
                write!(f, "MetadataServer({})", base_url)
            }
        }
    }
}

/// Immutable configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub destination: DestinationTable,
    pub kayzen_base_url: String,
    pub page_size: u32,
    pub bigquery_base_url: String,
    pub bigquery_location: Option<String>,
    pub gcp_credentials: GcpCredentials,
    pub http_timeout: Duration,
    pub job_timeout: Duration,
}

impl Config {
    /// Loads `.env` (if present) and resolves the configuration from the
    /// process environment.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|name| std::env::var(name).ok())?;

        tracing::debug!("Kayzen Base URL: {}", config.kayzen_base_url);
        tracing::debug!("BigQuery Base URL: {}", config.bigquery_base_url);
        tracing::debug!("Destination table: {}", config.destination);
        tracing::debug!("Google credentials: {:?}", config.gcp_credentials);

        Ok(config)
    }

    /// Resolves the configuration through `lookup`, which returns the raw
    /// value of a variable or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Credentials {
            api_key: required(&lookup, "KAYZEN_API_KEY")?,
            api_secret: required(&lookup, "KAYZEN_API_SECRET")?,
            username: required(&lookup, "KAYZEN_USERNAME")?,
            password: required(&lookup, "KAYZEN_PASSWORD")?,
        };

        let destination = DestinationTable {
            project: required(&lookup, "GCP_PROJECT_ID")?,
            dataset: required(&lookup, "BIGQUERY_DATASET_ID")?,
            table: required(&lookup, "BIGQUERY_TABLE_ID")?,
        };

        let page_size = parse_or(&lookup, "KAYZEN_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "KAYZEN_PAGE_SIZE must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        Ok(Self {
            credentials,
            destination,
            kayzen_base_url: base_url(&lookup, "KAYZEN_BASE_URL", DEFAULT_KAYZEN_BASE_URL)?,
            page_size,
            bigquery_base_url: base_url(&lookup, "BIGQUERY_BASE_URL", DEFAULT_BIGQUERY_BASE_URL)?,
            bigquery_location: optional(&lookup, "BIGQUERY_LOCATION"),
            gcp_credentials: gcp_credentials(&lookup)?,
            http_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30)?),
            job_timeout: Duration::from_secs(parse_or(
                &lookup,
                "BIGQUERY_JOB_TIMEOUT_SECS",
                300,
            )?),
        })
    }
}

/// Port the HTTP trigger listens on.
pub fn server_port() -> anyhow::Result<u16> {
    std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required<F>(lookup: &F, name: &str) -> Result<String, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Err(SyncError::Config(format!(
            "{} environment variable required",
            name
        ))),
        Some(value) if value.trim().is_empty() => {
            Err(SyncError::Config(format!("{} cannot be empty", name)))
        }
        Some(value) => Ok(value),
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, SyncError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match optional(lookup, name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::Config(format!("{} must be a positive number", name))),
    }
}

fn base_url<F>(lookup: &F, name: &str, default: &str) -> Result<String, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = optional(lookup, name).unwrap_or_else(|| default.to_string());
    let parsed = url::Url::parse(&raw)
        .map_err(|e| SyncError::Config(format!("{} is not a valid URL: {}", name, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(SyncError::Config(format!(
            "{} must start with http:// or https://",
            name
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn gcp_credentials<F>(lookup: &F) -> Result<GcpCredentials, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = optional(lookup, "BIGQUERY_ACCESS_TOKEN") {
        return Ok(GcpCredentials::AccessToken(token));
    }
    if let Some(json) = optional(lookup, "GOOGLE_SERVICE_ACCOUNT_JSON") {
        return Ok(GcpCredentials::ServiceAccountJson(json));
    }
    if let Some(path) = optional(lookup, "GOOGLE_SERVICE_ACCOUNT_KEY")
        .or_else(|| optional(lookup, "GOOGLE_APPLICATION_CREDENTIALS"))
    {
        return Ok(GcpCredentials::ServiceAccountFile(PathBuf::from(path)));
    }

    // Same variable the Google client libraries honour, host only.
    let base_url = match optional(lookup, "GCE_METADATA_HOST") {
        Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
            host.trim_end_matches('/').to_string()
        }
        Some(host) => format!("http://{}", host.trim_end_matches('/')),
        None => DEFAULT_METADATA_BASE_URL.to_string(),
    };
    Ok(GcpCredentials::MetadataServer { base_url })
}
