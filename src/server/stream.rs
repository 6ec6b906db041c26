//! Newline-delimited JSON streaming for `/v1/tools/{name}/stream`.
//!
//! The response is committed as `200` before the bridge is called, so a
//! failing call shows up as an in-band `error` event, never as a status code.
//! Events are `start`, then `result` + `end`, or a single `error`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::bridge::{invoke_detached, BridgeTransport};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";

/// One line of a streaming response.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        tool: String,
        timestamp: String,
    },
    Result {
        data: Value,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    End,
}

impl StreamEvent {
    pub fn start(tool: &str) -> Self {
        StreamEvent::Start {
            tool: tool.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Serialize as one NDJSON line, trailing newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode stream event");
            r#"{"event":"error","message":"failed to encode stream event"}"#.to_string()
        });
        line.push('\n');
        line
    }
}

/// Start a streaming tool call and return the response that carries its events.
///
/// The bridge call runs in its own task with a connection-scoped
/// cancellation token. The token's drop guard lives inside the body stream:
/// when the client disconnects, hyper drops the body, the guard fires, and
/// the bridge tears down its process or connection.
pub fn ndjson_response(
    bridge: Arc<dyn BridgeTransport>,
    tool: String,
    params: Map<String, Value>,
) -> Response {
    let cancel = CancellationToken::new();

    let events = async_stream::stream! {
        let _disconnect_guard = cancel.clone().drop_guard();

        yield Ok::<_, Infallible>(StreamEvent::start(&tool).to_line());

        let call = invoke_detached(bridge, tool.clone(), params, Some(cancel.clone()));
        match call.await {
            Ok(data) => {
                yield Ok(StreamEvent::Result { data }.to_line());
                yield Ok(StreamEvent::End.to_line());
            }
            Err(e) => {
                tracing::error!(tool = %tool, error = %e, "stream tool call failed");
                yield Ok(StreamEvent::Error {
                    message: e.to_string(),
                    details: e.details().cloned(),
                }
                .to_line());
            }
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(events),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    async fn lines(response: Response) -> Vec<Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.ends_with('\n'));
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_event_wire_shapes() {
        assert_eq!(StreamEvent::End.to_line(), "{\"event\":\"end\"}\n");
        assert_eq!(
            serde_json::to_value(StreamEvent::Result { data: json!([1]) }).unwrap(),
            json!({"event": "result", "data": [1]})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Error {
                message: "boom".to_string(),
                details: None
            })
            .unwrap(),
            json!({"event": "error", "message": "boom"})
        );
        let start = serde_json::to_value(StreamEvent::start("get_version")).unwrap();
        assert_eq!(start["event"], "start");
        assert_eq!(start["tool"], "get_version");
        assert!(start["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_stream_success_sequence() {
        let bridge = Arc::new(MockBridge::new(MockReply::Ok(json!({"version": "5.0.37"}))));
        let response = send(
            state(Some("secret"), bridge),
            post("/v1/tools/get_version/stream", Some("secret"), "{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            NDJSON_CONTENT_TYPE
        );

        let events = lines(response).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "start");
        assert_eq!(events[0]["tool"], "get_version");
        assert_eq!(events[1], json!({"event": "result", "data": {"version": "5.0.37"}}));
        assert_eq!(events[2], json!({"event": "end"}));
    }

    #[tokio::test]
    async fn test_stream_failure_is_in_band_without_end() {
        let bridge = Arc::new(MockBridge::new(MockReply::Fail {
            message: "terminal not found".to_string(),
            details: Some(json!({"code": -6})),
        }));
        let response = send(
            state(Some("secret"), bridge),
            post("/v1/tools/get_version/stream", Some("secret"), "{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let events = lines(response).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "start");
        assert_eq!(
            events[1],
            json!({"event": "error", "message": "terminal not found", "details": {"code": -6}})
        );
    }

    #[tokio::test]
    async fn test_stream_validation_errors_happen_before_stream() {
        let bridge = Arc::new(MockBridge::new(MockReply::Ok(json!(null))));
        let response = send(
            state(Some("secret"), bridge.clone()),
            post("/v1/tools/get_version/stream", Some("secret"), r#"{"params": []}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_bridge_call() {
        let bridge = Arc::new(MockBridge::new(MockReply::Hang));
        let response = send(
            state(Some("secret"), bridge.clone()),
            post("/v1/tools/copy_ticks_range/stream", Some("secret"), "{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let start: Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(start["event"], "start");

        // Poll once more so the bridge task is running, then hang up.
        let pending = tokio::time::timeout(Duration::from_millis(100), body.next()).await;
        assert!(pending.is_err(), "no event expected while the call is hanging");
        drop(body);

        tokio::time::timeout(Duration::from_secs(5), bridge.observed_cancel.cancelled())
            .await
            .expect("bridge call should observe cancellation after disconnect");
        assert_eq!(bridge.calls().len(), 1);
    }
}
