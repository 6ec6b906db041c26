//! Liveness and readiness endpoints.
//!
//! `/health` only describes the gateway process. `/health/detailed` also
//! exercises the bridge: a remote bridge is probed first, then `get_version`
//! is called through the same transport real tool calls use.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::AppState;
use crate::bridge::invoke_detached;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub require_auth: bool,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub runtime_version: &'static str,
    pub platform: &'static str,
}

impl HealthReport {
    fn new(state: &AppState, status: &'static str) -> Self {
        Self {
            status,
            require_auth: state.config.require_auth(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            runtime_version: env!("CARGO_PKG_VERSION"),
            platform: std::env::consts::OS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Mt5Status {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /health/detailed`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthReport {
    #[serde(flatten)]
    pub base: HealthReport,
    pub healthy: bool,
    pub bridge_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_url: Option<String>,
    pub mt5: Mt5Status,
}

impl DetailedHealthReport {
    fn ok(state: &AppState, version: Value) -> Self {
        Self::build(
            state,
            Mt5Status {
                available: true,
                version: Some(version),
                error: None,
            },
        )
    }

    fn degraded(state: &AppState, error: String) -> Self {
        Self::build(
            state,
            Mt5Status {
                available: false,
                version: None,
                error: Some(error),
            },
        )
    }

    fn build(state: &AppState, mt5: Mt5Status) -> Self {
        let healthy = mt5.available;
        Self {
            base: HealthReport::new(state, if healthy { "ok" } else { "degraded" }),
            healthy,
            bridge_mode: state.bridge.mode(),
            bridge_url: state.bridge.remote_url().map(str::to_string),
            mt5,
        }
    }

    fn status_code(&self) -> StatusCode {
        if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for DetailedHealthReport {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::new(&state, "ok"))
}

pub async fn detailed(State(state): State<AppState>) -> DetailedHealthReport {
    if let Some(probe) = state.bridge.probe().await {
        let unavailable = match probe {
            Ok(health) if health.available => None,
            Ok(health) => Some(
                health
                    .error()
                    .unwrap_or("Bridge not available")
                    .to_string(),
            ),
            Err(e) => Some(e.to_string()),
        };
        if let Some(error) = unavailable {
            tracing::warn!(error = %error, "bridge health probe failed");
            return DetailedHealthReport::degraded(&state, error);
        }
    }

    let call = invoke_detached(state.bridge.clone(), "get_version".to_string(), Map::new(), None);
    match call.await {
        Ok(version) => DetailedHealthReport::ok(&state, version),
        Err(e) => {
            tracing::warn!(error = %e, "bridge readiness call failed");
            DetailedHealthReport::degraded(&state, e.to_string())
        }
    }
}
