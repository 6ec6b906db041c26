//! Error types for the MT5 gateway.
//!
//! `BridgeError` covers everything that can go wrong while a tool call is in
//! flight on either transport. `ApiError` is what the router renders back to
//! HTTP clients. `GatewayError` is reserved for startup and configuration.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

/// Failure of a single tool invocation on a bridge transport.
///
/// The `Display` output is the message clients see.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Tool name was empty
    #[error("Missing tool name")]
    MissingTool,

    /// Caller cancelled the invocation (client went away)
    #[error("Request aborted")]
    Cancelled,

    /// Bridge process could not be started
    #[error("failed to spawn bridge process '{program}': {cause}")]
    Spawn { program: String, cause: String },

    /// Pipe or wait failure while talking to the bridge process
    #[error("bridge process I/O error: {0}")]
    Io(String),

    /// Bridge answered with something that is not JSON
    #[error("{0}")]
    InvalidResponse(String),

    /// Bridge reported a failure in its envelope, or exited/answered abnormally
    #[error("{message}")]
    Failed {
        message: String,
        details: Option<Value>,
        traceback: Option<String>,
    },

    /// Remote bridge rejected our bearer token
    #[error("Unauthorized: Invalid MT5 bridge token")]
    Unauthorized,

    /// Remote bridge has no `/execute` endpoint
    #[error("MT5 bridge endpoint not found")]
    EndpointNotFound,

    /// Remote bridge unreachable
    #[error("Failed to connect to MT5 bridge at {url}: {cause}")]
    Connect { url: String, cause: String },

    /// Remote bridge did not answer in time
    #[error("Request to MT5 bridge timed out")]
    Timeout,

    /// Remote `/health` answered with a body that is not JSON
    #[error("Invalid health check response: {0}")]
    InvalidHealthResponse(String),

    /// The task running the call panicked or was aborted
    #[error("tool call task failed: {0}")]
    Task(String),
}

impl BridgeError {
    /// Opaque details attached by the bridge, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            BridgeError::Failed { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// Remote traceback attached by the bridge, if any. Logged, never returned to clients.
    pub fn traceback(&self) -> Option<&str> {
        match self {
            BridgeError::Failed { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }
}

/// Startup and configuration errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid or unreadable configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Listener could not be bound
    #[error("failed to bind {addr}: {cause}")]
    Bind { addr: String, cause: String },

    /// HTTP server stopped with an error
    #[error("server error: {0}")]
    Serve(String),
}

/// Result type alias for gateway startup operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors rendered by the router as `{ok:false, error, details?}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Server authentication is not configured. Set AUTH_TOKEN in the environment.")]
    NotConfigured,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::PayloadTooLarge => StatusCode::BAD_REQUEST,
            ApiError::Bridge(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({ "ok": false, "error": self.to_string() });
        if let ApiError::Bridge(err) = &self {
            if let Some(details) = err.details() {
                body["details"] = details.clone();
            }
        }

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::PayloadTooLarge) {
            // The rest of the oversized body is never read; drop the connection.
            response
                .headers_mut()
                .insert(header::CONNECTION, header::HeaderValue::from_static("close"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_display_is_bridge_message() {
        let err = BridgeError::Failed {
            message: "terminal not found".to_string(),
            details: None,
            traceback: None,
        };
        assert_eq!(err.to_string(), "terminal not found");
    }

    #[test]
    fn test_connect_display_names_url() {
        let err = BridgeError::Connect {
            url: "http://10.0.0.5:5555".to_string(),
            cause: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to MT5 bridge at http://10.0.0.5:5555: connection refused"
        );
    }

    #[test]
    fn test_details_only_on_failed() {
        let err = BridgeError::Failed {
            message: "bad symbol".to_string(),
            details: Some(json!({"symbol": "XYZ"})),
            traceback: Some("Traceback ...".to_string()),
        };
        assert_eq!(err.details(), Some(&json!({"symbol": "XYZ"})));
        assert_eq!(err.traceback(), Some("Traceback ..."));
        assert!(BridgeError::Timeout.details().is_none());
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(ApiError::NotConfigured.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::BadRequest("Invalid JSON body".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::PayloadTooLarge.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(BridgeError::Timeout).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_payload_too_large_closes_connection() {
        let response = ApiError::PayloadTooLarge.into_response();
        assert_eq!(
            response.headers().get(header::CONNECTION).unwrap(),
            "close"
        );
    }
}
