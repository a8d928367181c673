use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Failure of one sync invocation, tagged with the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A required environment value is missing or malformed.
    Config(String),
    /// The Kayzen identity endpoint rejected the credentials or was unreachable.
    Auth(String),
    /// The campaign listing endpoint failed or returned a malformed page.
    Fetch(String),
    /// The destination table could not be reached, or a delete/insert failed.
    Load(String),
}

impl SyncError {
    /// Short stage name reported to the trigger and in logs.
    pub fn stage(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "config",
            SyncError::Auth(_) => "auth",
            SyncError::Fetch(_) => "fetch",
            SyncError::Load(_) => "load",
        }
    }

    /// Maps each stage to the status code returned by the entry point.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::Auth(_) | SyncError::Fetch(_) | SyncError::Load(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// JSON body reported to the trigger.
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": self.to_string(),
            "stage": self.stage(),
        })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            SyncError::Fetch(msg) => write!(f, "Campaign fetch failed: {}", msg),
            SyncError::Load(msg) => write!(f, "Warehouse load failed: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl IntoResponse for SyncError {
    /// Converts the error into the failure response seen by the trigger.
    ///
    /// The full message goes to the log; the body carries the stage so the
    /// caller can tell where the run stopped.
    fn into_response(self) -> Response {
        tracing::error!(stage = self.stage(), "❌ Sync failed: {}", self);

        (self.status_code(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(SyncError::Config("x".into()).stage(), "config");
        assert_eq!(SyncError::Auth("x".into()).stage(), "auth");
        assert_eq!(SyncError::Fetch("x".into()).stage(), "fetch");
        assert_eq!(SyncError::Load("x".into()).stage(), "load");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SyncError::Config("missing".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SyncError::Auth("401".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_display_names_stage() {
        let err = SyncError::Auth("status 401 Unauthorized".into());
        assert_eq!(
            err.to_string(),
            "Authentication failed: status 401 Unauthorized"
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = SyncError::Load("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
