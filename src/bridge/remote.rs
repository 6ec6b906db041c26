//! Remote HTTP bridge.
//!
//! Used when the gateway runs away from the MetaTrader terminal (typically
//! Linux gateway, Windows bridge). Each call is a single `POST /execute` with
//! a bearer token; there is no pooling, retry or backoff beyond what the HTTP
//! client does for one request.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::bridge::{cancelled, BridgeEnvelope, BridgeHealth, BridgeTransport, ToolRequest};
use crate::error::{BridgeError, GatewayError};

/// Timeout for `POST /execute`.
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `GET /health`.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge that forwards tool calls to a remote bridge server.
#[derive(Debug, Clone)]
pub struct RemoteBridge {
    base_url: String,
    execute_url: Url,
    health_url: Url,
    token: Option<String>,
    client: reqwest::Client,
    execute_timeout: Duration,
    health_timeout: Duration,
}

impl RemoteBridge {
    /// Create a bridge for `base_url`. `/execute` and `/health` replace any path on it.
    pub fn new(base_url: &str, token: Option<String>) -> crate::Result<Self> {
        let invalid = |e: String| {
            GatewayError::Config(format!("invalid bridge URL '{}': {}", base_url, e))
        };
        let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        let execute_url = base.join("/execute").map_err(|e| invalid(e.to_string()))?;
        let health_url = base.join("/health").map_err(|e| invalid(e.to_string()))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.to_string(),
            execute_url,
            health_url,
            token: token.filter(|t| !t.is_empty()),
            client,
            execute_timeout: EXECUTE_TIMEOUT,
            health_timeout: HEALTH_TIMEOUT,
        })
    }

    /// Override the call and health-probe timeouts.
    pub fn with_timeouts(mut self, execute: Duration, health: Duration) -> Self {
        self.execute_timeout = execute;
        self.health_timeout = health;
        self
    }

    fn request_error(&self, e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Connect {
                url: self.base_url.clone(),
                cause: e.to_string(),
            }
        }
    }

    async fn execute(&self, tool: &str, params: &Map<String, Value>) -> Result<Value, BridgeError> {
        let mut request = self
            .client
            .post(self.execute_url.clone())
            .timeout(self.execute_timeout)
            .json(&ToolRequest { tool, params });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => return Err(BridgeError::Unauthorized),
            StatusCode::NOT_FOUND => return Err(BridgeError::EndpointNotFound),
            _ => {}
        }

        let body = response.text().await.map_err(|e| self.request_error(e))?;
        let parsed: Value = serde_json::from_str(&body).map_err(|_| {
            BridgeError::InvalidResponse(format!("Invalid JSON response from bridge: {}", body))
        })?;
        let envelope = BridgeEnvelope::from_value(parsed);

        if status != StatusCode::OK || envelope.is_failure() {
            if let Some(traceback) = &envelope.traceback {
                tracing::error!(tool = %tool, status = %status, traceback = %traceback, "remote bridge traceback");
            }
            let message = envelope
                .error_message()
                .unwrap_or_else(|| format!("Bridge returned status {}", status.as_u16()));
            return Err(BridgeError::Failed {
                message,
                details: envelope.details,
                traceback: envelope.traceback,
            });
        }

        Ok(envelope.into_result())
    }

    /// Probe `GET /health`.
    ///
    /// Unreachable or slow bridges resolve to `available: false` with an
    /// `error`. Only a body that is not JSON is an `Err`.
    pub async fn check_health(&self) -> Result<BridgeHealth, BridgeError> {
        let unreachable = |e: reqwest::Error| {
            if e.is_timeout() {
                BridgeHealth::unavailable("Health check timed out")
            } else {
                BridgeHealth::unavailable(format!("Failed to connect: {}", e))
            }
        };

        let response = match self
            .client
            .get(self.health_url.clone())
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(unreachable(e)),
        };
        let status_ok = response.status() == StatusCode::OK;
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(unreachable(e)),
        };

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|_| BridgeError::InvalidHealthResponse(body.clone()))?;
        let mut extra = match parsed {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        // A body-supplied `available` overrides the status-derived value.
        let available = match extra.remove("available") {
            Some(reported) => truthy(&reported),
            None => status_ok,
        };

        Ok(BridgeHealth { available, extra })
    }
}

/// Loose truthiness for the health body's `available` flag.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[async_trait]
impl BridgeTransport for RemoteBridge {
    async fn invoke(
        &self,
        tool: &str,
        params: Map<String, Value>,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, BridgeError> {
        if tool.is_empty() {
            return Err(BridgeError::MissingTool);
        }
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(BridgeError::Cancelled);
        }

        let start = Instant::now();
        // Dropping the request future tears the connection down.
        let result = tokio::select! {
            result = self.execute(tool, &params) => result,
            _ = cancelled(cancel.as_ref()) => {
                tracing::info!(tool = %tool, "bridge call cancelled, aborting remote request");
                return Err(BridgeError::Cancelled);
            }
        };

        tracing::info!(
            tool = %tool,
            ok = result.is_ok(),
            duration_ms = %start.elapsed().as_millis(),
            "remote bridge invocation"
        );
        result
    }

    fn mode(&self) -> &'static str {
        "remote"
    }

    fn remote_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }

    async fn probe(&self) -> Option<Result<BridgeHealth, BridgeError>> {
        Some(self.check_health().await)
    }
}
