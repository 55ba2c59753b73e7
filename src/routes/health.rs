//! Health, readiness and version endpoints
//!
//! `/health` answers 200 whenever the process is serving and reports which
//! storage backend is active plus the session store's counters. `/ready`
//! additionally pings MongoDB when one is configured and answers 503 while it
//! is unreachable.

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::routes::response::{json_response, FullBody};
use crate::server::AppState;

const SERVICE: &str = "examdesk";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub service: &'static str,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// "development" or "production"
    pub mode: &'static str,
    /// "mongodb" or "memory"
    pub storage: &'static str,
    pub sessions: SessionStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

impl HealthResponse {
    fn from_state(state: &AppState) -> Self {
        let stats = state.sessions.stats();
        Self {
            healthy: true,
            service: SERVICE,
            version: env!("CARGO_PKG_VERSION"),
            uptime: state.started_at.elapsed().as_secs(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode: if state.args.dev_mode {
                "development"
            } else {
                "production"
            },
            storage: if state.mongo.is_some() { "mongodb" } else { "memory" },
            sessions: SessionStats {
                entries: stats.entries,
                hits: stats.hits,
                misses: stats.misses,
                evictions: stats.evictions,
                hit_rate: stats.hit_rate(),
            },
        }
    }
}

/// GET /health, /healthz
pub fn health_check(state: Arc<AppState>) -> Response<FullBody> {
    json_response(StatusCode::OK, &HealthResponse::from_state(&state))
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub storage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /ready, /readyz
pub async fn readiness_check(state: Arc<AppState>) -> Response<FullBody> {
    let Some(mongo) = &state.mongo else {
        return json_response(
            StatusCode::OK,
            &ReadinessResponse {
                ready: true,
                storage: "memory",
                error: None,
            },
        );
    };

    match mongo.ping().await {
        Ok(()) => json_response(
            StatusCode::OK,
            &ReadinessResponse {
                ready: true,
                storage: "mongodb",
                error: None,
            },
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &ReadinessResponse {
                    ready: false,
                    storage: "mongodb",
                    error: Some("Database unreachable".into()),
                },
            )
        }
    }
}

/// GET /version: build identity for deployment checks
pub fn version_info() -> Response<FullBody> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "service": SERVICE,
            "version": env!("CARGO_PKG_VERSION"),
            "commit": option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            "buildTime": option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        }),
    )
}
