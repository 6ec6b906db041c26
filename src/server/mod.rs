//! HTTP surface of the gateway.
//!
//! - `GET /health`, `GET /health/detailed`: unauthenticated liveness/readiness
//! - `POST /v1/tools/{name}`: one JSON response
//! - `POST /v1/tools/{name}/stream`: newline-delimited JSON events
//!
//! Everything that is not a health GET goes through the auth gate first, so
//! unknown paths answer 401/500 before they answer 404.

pub mod health;
pub mod stream;
pub mod tools;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeTransport;
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub bridge: Arc<dyn BridgeTransport>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, bridge: Arc<dyn BridgeTransport>) -> Self {
        Self {
            config: Arc::new(config),
            bridge,
            started_at: Instant::now(),
        }
    }
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health).fallback(tools::handle))
        .route("/health/detailed", get(health::detailed).fallback(tools::handle))
        .fallback(tools::handle)
        .with_state(state)
}

/// Bind the listener for `host:port`.
pub async fn bind(host: &str, port: u16) -> crate::Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr).await.map_err(|e| GatewayError::Bind {
        addr,
        cause: e.to_string(),
    })
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> crate::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| GatewayError::Serve(e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, Response};
    use serde_json::{Map, Value};
    use tokio_util::sync::CancellationToken;

    use super::AppState;
    use crate::bridge::{BridgeHealth, BridgeTransport};
    use crate::config::{BridgeMode, GatewayConfig};
    use crate::error::BridgeError;

    /// What the mock bridge does when invoked.
    pub enum MockReply {
        Ok(Value),
        Fail { message: String, details: Option<Value> },
        /// Block until cancelled.
        Hang,
        /// Succeed with `value` after `delay`, ignoring cancellation.
        Slow { delay: Duration, value: Value },
    }

    pub struct MockBridge {
        pub reply: MockReply,
        pub calls: Mutex<Vec<(String, Map<String, Value>)>>,
        pub remote: Option<(String, BridgeHealth)>,
        /// Fired when a hanging call observes its cancellation.
        pub observed_cancel: CancellationToken,
        /// Fired when a slow call runs to completion.
        pub completed: CancellationToken,
    }

    impl MockBridge {
        pub fn new(reply: MockReply) -> Self {
            Self {
                reply,
                calls: Mutex::new(Vec::new()),
                remote: None,
                observed_cancel: CancellationToken::new(),
                completed: CancellationToken::new(),
            }
        }

        pub fn remote(mut self, url: &str, health: BridgeHealth) -> Self {
            self.remote = Some((url.to_string(), health));
            self
        }

        pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BridgeTransport for MockBridge {
        async fn invoke(
            &self,
            tool: &str,
            params: Map<String, Value>,
            cancel: Option<CancellationToken>,
        ) -> Result<Value, BridgeError> {
            self.calls.lock().unwrap().push((tool.to_string(), params));
            match &self.reply {
                MockReply::Ok(value) => Ok(value.clone()),
                MockReply::Fail { message, details } => Err(BridgeError::Failed {
                    message: message.clone(),
                    details: details.clone(),
                    traceback: Some("Traceback (most recent call last): ...".to_string()),
                }),
                MockReply::Hang => {
                    match cancel {
                        Some(token) => token.cancelled().await,
                        None => std::future::pending().await,
                    }
                    self.observed_cancel.cancel();
                    Err(BridgeError::Cancelled)
                }
                MockReply::Slow { delay, value } => {
                    tokio::time::sleep(*delay).await;
                    self.completed.cancel();
                    Ok(value.clone())
                }
            }
        }

        fn mode(&self) -> &'static str {
            if self.remote.is_some() { "remote" } else { "local" }
        }

        fn remote_url(&self) -> Option<&str> {
            self.remote.as_ref().map(|(url, _)| url.as_str())
        }

        async fn probe(&self) -> Option<Result<BridgeHealth, BridgeError>> {
            self.remote.as_ref().map(|(_, health)| Ok(health.clone()))
        }
    }

    pub fn config(auth_token: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            port: 8080,
            auth_token: auth_token.map(str::to_string),
            bridge: BridgeMode::Local {
                python: "python".to_string(),
                script: PathBuf::from("python/bridge.py"),
            },
            mt5_path: None,
            bridge_env: HashMap::new(),
        }
    }

    pub fn state(auth_token: Option<&str>, bridge: Arc<MockBridge>) -> AppState {
        AppState::new(config(auth_token), bridge)
    }

    pub async fn send(state: AppState, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        super::router(state).oneshot(request).await.unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub fn post(uri: &str, auth: Option<&str>, body: impl Into<Body>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("auth", auth);
        }
        builder.body(body.into()).unwrap()
    }
}
