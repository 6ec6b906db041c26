//! mt5-gateway: HTTP front door for a MetaTrader 5 tool bridge.
//! Authenticates tool calls, routes `/v1/tools/{name}` to either a local
//! subprocess bridge or a remote HTTP bridge, and streams results as NDJSON.

pub mod bridge;
pub mod config;
pub mod error;
pub mod server;

pub use bridge::{build_transport, BridgeHealth, BridgeTransport, LocalBridge, RemoteBridge};
pub use config::{load_env_file, parse_env_file, BridgeMode, GatewayConfig};
pub use error::{ApiError, BridgeError, GatewayError, Result};
pub use server::{bind, router, serve, AppState};
