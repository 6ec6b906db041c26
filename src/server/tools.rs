//! Authenticated tool routes.
//!
//! Stages run in order and stop at the first failure:
//! auth gate → path match → body parse → bridge dispatch.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Map, Value};

use crate::bridge::invoke_detached;
use crate::error::ApiError;
use crate::server::stream::ndjson_response;
use crate::server::AppState;

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Header carrying the shared secret.
pub const AUTH_HEADER: &str = "auth";

/// A resolved `/v1/tools/...` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolRoute<'a> {
    pub name: &'a str,
    pub stream: bool,
}

/// Match `/v1/tools/{name}` and `/v1/tools/{name}/stream`. Empty segments are ignored.
pub fn match_tool_path(path: &str) -> Option<ToolRoute<'_>> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        ["v1", "tools", name] => Some(ToolRoute {
            name: *name,
            stream: false,
        }),
        ["v1", "tools", name, "stream"] => Some(ToolRoute {
            name: *name,
            stream: true,
        }),
        _ => None,
    }
}

/// Fallback handler for every request that is not a health GET.
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match dispatch(state, method, uri, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn dispatch(
    state: AppState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    authorize(state.config.auth_token.as_deref(), &headers)?;

    let route = match_tool_path(uri.path())
        .filter(|_| method == Method::POST)
        .ok_or(ApiError::NotFound)?;

    let body = read_json_body(body).await?;
    let params = extract_params(body)?;

    tracing::debug!(tool = %route.name, stream = route.stream, "tool request");

    if route.stream {
        return Ok(ndjson_response(
            state.bridge.clone(),
            route.name.to_string(),
            params,
        ));
    }

    let call = invoke_detached(state.bridge.clone(), route.name.to_string(), params, None);
    match call.await {
        Ok(result) => Ok((StatusCode::OK, Json(json!({ "ok": true, "result": result }))).into_response()),
        Err(e) => {
            tracing::error!(tool = %route.name, error = %e, "tool call failed");
            Err(ApiError::Bridge(e))
        }
    }
}

/// Refuse everything when no token is configured; otherwise require an exact match.
fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = expected.ok_or(ApiError::NotConfigured)?;
    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Read at most [`MAX_BODY_BYTES`] and parse as JSON. An empty body is `null`.
async fn read_json_body(body: Body) -> Result<Value, ApiError> {
    let mut stream = body.into_data_stream();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            tracing::warn!(limit = MAX_BODY_BYTES, "request body too large, closing connection");
            return Err(ApiError::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    if buf.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&buf).map_err(|_| ApiError::BadRequest("Invalid JSON body".to_string()))
}

/// `params` must be an object when present. Missing or `null` means `{}`.
fn extract_params(body: Value) -> Result<Map<String, Value>, ApiError> {
    let params = match body {
        Value::Object(mut map) => map.remove("params"),
        _ => None,
    };
    match params {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(ApiError::BadRequest("params must be an object".to_string())),
    }
}
