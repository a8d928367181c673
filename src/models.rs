use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column added to every row on ingestion.
pub const FETCH_TIMESTAMP_FIELD: &str = "fetch_timestamp";

/// Upsert and clustering key.
pub const ID_FIELD: &str = "id";

/// Bearer token issued by the Kayzen identity endpoint.
#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body of a successful token exchange.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// One campaign record, kept in whatever shape Kayzen returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Campaign(Map<String, Value>);

impl Campaign {
    /// Upsert key as a string. Numeric and string ids are both accepted;
    /// null, empty or structured ids yield `None`.
    pub fn id(&self) -> Option<String> {
        match self.0.get(ID_FIELD)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Sets `fetch_timestamp`, replacing any value already present.
    pub fn stamp(&mut self, fetch_timestamp: &str) {
        self.0.insert(
            FETCH_TIMESTAMP_FIELD.to_string(),
            Value::String(fetch_timestamp.to_string()),
        );
    }
}

impl TryFrom<Value> for Campaign {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(format!("expected campaign object, got {}", json_kind(&other))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Pagination metadata some Kayzen list responses carry next to `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageMeta {
    #[serde(default, alias = "page")]
    pub current_page: Option<u64>,
    #[serde(default, alias = "last_page")]
    pub total_pages: Option<u64>,
    #[serde(default, alias = "total")]
    pub total_count: Option<u64>,
}

/// Raw page body. `data` entries are validated into campaigns separately
/// so a bad record reports which page it came from.
#[derive(Debug, Deserialize)]
pub struct CampaignPageBody {
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default, alias = "pagination")]
    pub meta: Option<PageMeta>,
}

/// One page of campaigns plus its continuation indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignPage {
    pub data: Vec<Campaign>,
    pub meta: Option<PageMeta>,
}

/// Formats the invocation's fetch timestamp (RFC 3339, UTC, microseconds).
pub fn format_fetch_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Result of one successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub campaigns_fetched: usize,
    pub campaigns_processed: usize,
    pub fetch_timestamp: String,
}

/// Success body returned to the trigger.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub message: String,
    pub campaigns_processed: usize,
    pub fetch_timestamp: String,
}

impl From<SyncSummary> for SyncResponse {
    fn from(summary: SyncSummary) -> Self {
        Self {
            message: "Success".to_string(),
            campaigns_processed: summary.campaigns_processed,
            fetch_timestamp: summary.fetch_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn campaign(value: Value) -> Campaign {
        Campaign::try_from(value).unwrap()
    }

    #[test]
    fn test_campaign_id_variants() {
        assert_eq!(campaign(json!({"id": 42})).id(), Some("42".to_string()));
        assert_eq!(campaign(json!({"id": "abc"})).id(), Some("abc".to_string()));
        assert_eq!(campaign(json!({"id": null})).id(), None);
        assert_eq!(campaign(json!({"id": ""})).id(), None);
        assert_eq!(campaign(json!({"id": {"nested": 1}})).id(), None);
        assert_eq!(campaign(json!({"name": "no id"})).id(), None);
    }

    #[test]
    fn test_non_object_rejected() {
        let err = Campaign::try_from(json!([1, 2])).unwrap_err();
        assert!(err.contains("array"));
    }

    #[test]
    fn test_stamp_overwrites() {
        let mut c = campaign(json!({"id": 1, "fetch_timestamp": "old"}));
        c.stamp("2026-01-01T00:00:00.000000Z");
        assert_eq!(
            c.get(FETCH_TIMESTAMP_FIELD),
            Some(&json!("2026-01-01T00:00:00.000000Z"))
        );
    }

    #[test]
    fn test_fetch_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_fetch_timestamp(at), "2026-03-04T05:06:07.000000Z");
    }

    #[test]
    fn test_page_body_aliases() {
        let body: CampaignPageBody = serde_json::from_value(json!({
            "data": [{"id": 1}],
            "pagination": {"page": 2, "last_page": 5, "total": 420}
        }))
        .unwrap();
        let meta = body.meta.unwrap();
        assert_eq!(meta.current_page, Some(2));
        assert_eq!(meta.total_pages, Some(5));
        assert_eq!(meta.total_count, Some(420));
    }

    #[test]
    fn test_page_body_without_data() {
        let body: CampaignPageBody = serde_json::from_value(json!({})).unwrap();
        assert!(body.data.is_none());
        assert!(body.meta.is_none());
    }
}
