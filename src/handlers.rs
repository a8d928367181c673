use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::Config;
use crate::errors::SyncError;
use crate::models::{SyncResponse, SyncSummary};
use crate::pipeline;

/// Largest trigger body accepted. The trigger sends no payload.
const MAX_TRIGGER_BODY_BYTES: usize = 64 * 1024;

/// Resolves the configuration at the start of each invocation.
pub type ConfigLoader = Arc<dyn Fn() -> Result<Config, SyncError> + Send + Sync>;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Source of the per-invocation configuration.
    pub config_loader: ConfigLoader,
}

impl AppState {
    /// State that reads the process environment on every invocation.
    pub fn from_env() -> Self {
        Self {
            config_loader: Arc::new(Config::from_env),
        }
    }

    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Config, SyncError> + Send + Sync + 'static,
    {
        Self {
            config_loader: Arc::new(loader),
        }
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "kayzen-campaign-sync",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET|POST /
///
/// Runs one full sync. Never fails at the transport level: every error is
/// logged and turned into a failure status with a JSON body naming the
/// stage that failed.
pub async fn trigger_sync(State(state): State<Arc<AppState>>) -> Response {
    match invoke(&state).await {
        Ok(summary) => {
            tracing::info!(
                "✅ Processed {} campaigns",
                summary.campaigns_processed
            );
            (StatusCode::OK, Json(SyncResponse::from(summary))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn invoke(state: &AppState) -> Result<SyncSummary, SyncError> {
    let config = (state.config_loader)()?;
    pipeline::run(&config).await
}

/// Routes for the trigger and the health probe.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(trigger_sync).post(trigger_sync))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_TRIGGER_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}
