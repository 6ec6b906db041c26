//! Bridge transports: where tool calls actually execute.
//!
//! Both transports speak the same envelope: the gateway sends
//! `{"tool": ..., "params": {...}}` and gets back
//! `{"ok": bool, "result"?, "error"?, "details"?, "traceback"?}`.
//! The transport is chosen once at startup from [`GatewayConfig`].

pub mod local;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeMode, GatewayConfig};
use crate::error::BridgeError;

pub use local::LocalBridge;
pub use remote::RemoteBridge;

/// Tool call as written to the bridge.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolRequest<'a> {
    pub tool: &'a str,
    pub params: &'a Map<String, Value>,
}

/// Reply envelope shared by both transports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeEnvelope {
    pub ok: Option<bool>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub details: Option<Value>,
    pub traceback: Option<String>,
}

impl BridgeEnvelope {
    /// Decode a parsed JSON reply field by field.
    ///
    /// A field of the wrong type is treated as absent without affecting the
    /// others, so `ok:false` survives a malformed `traceback`. Anything that
    /// is not an object is the empty envelope.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::default();
        };
        let present = |v: Value| (!v.is_null()).then_some(v);
        Self {
            ok: map.get("ok").and_then(Value::as_bool),
            traceback: map
                .get("traceback")
                .and_then(Value::as_str)
                .map(str::to_string),
            result: map.remove("result").and_then(present),
            error: map.remove("error").and_then(present),
            details: map.remove("details").and_then(present),
        }
    }

    /// True only when the bridge explicitly said `"ok": false`.
    pub fn is_failure(&self) -> bool {
        self.ok == Some(false)
    }

    /// The bridge's error message. Non-string errors are rendered as JSON; empty strings count as absent.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The tool result, `null` when the bridge sent none.
    pub fn into_result(self) -> Value {
        self.result.unwrap_or(Value::Null)
    }
}

/// Remote bridge liveness as reported by its `/health` endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BridgeHealth {
    pub available: bool,
    /// Remaining fields of the remote health body, or `error` when unreachable.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BridgeHealth {
    pub fn unavailable(error: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("error".to_string(), Value::String(error.into()));
        Self {
            available: false,
            extra,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.extra.get("error").and_then(Value::as_str)
    }
}

/// A place tool calls can be sent to.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Run `tool` with `params` and return the bridge's `result`.
    ///
    /// When `cancel` fires before completion the underlying process or
    /// connection is torn down and the call fails with [`BridgeError::Cancelled`].
    async fn invoke(
        &self,
        tool: &str,
        params: Map<String, Value>,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, BridgeError>;

    /// `"local"` or `"remote"`.
    fn mode(&self) -> &'static str;

    /// Remote base URL, if this transport has one.
    fn remote_url(&self) -> Option<&str> {
        None
    }

    /// Lightweight liveness probe. `None` when the transport has nothing to probe.
    async fn probe(&self) -> Option<Result<BridgeHealth, BridgeError>> {
        None
    }
}

/// Build the transport selected by the configuration.
pub fn build_transport(config: &GatewayConfig) -> crate::Result<Arc<dyn BridgeTransport>> {
    let transport: Arc<dyn BridgeTransport> = match &config.bridge {
        BridgeMode::Local { python, script } => Arc::new(
            LocalBridge::new(python.clone(), vec![script.display().to_string()])
                .with_env(config.bridge_env.clone()),
        ),
        BridgeMode::Remote { url, token } => Arc::new(RemoteBridge::new(url, token.clone())?),
    };
    Ok(transport)
}

/// Run `bridge.invoke` on its own task and wait for it.
///
/// Dropping the returned future detaches the call instead of tearing it
/// down, so a caller that goes away mid-call (an HTTP client hanging up)
/// cannot kill a tool that is already executing. Only `cancel` stops it.
pub async fn invoke_detached(
    bridge: Arc<dyn BridgeTransport>,
    tool: String,
    params: Map<String, Value>,
    cancel: Option<CancellationToken>,
) -> Result<Value, BridgeError> {
    let task = tokio::spawn(async move { bridge.invoke(&tool, params, cancel).await });
    match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "tool call task failed");
            Err(BridgeError::Task(e.to_string()))
        }
    }
}

/// Resolves when `cancel` fires; never resolves when there is no token.
pub(crate) async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
