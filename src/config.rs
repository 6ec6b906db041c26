//! Gateway configuration: env-file parsing and environment resolution.
//!
//! Configuration is resolved once at startup into an immutable
//! [`GatewayConfig`] that is handed to the router and the bridge transports.
//! Values come from the process environment first and an optional
//! `KEY=value` file second; the file never overrides the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::GatewayError;

/// Default HTTP port when `NODE_PORT` is unset.
pub const DEFAULT_PORT: u16 = 8080;

/// Default interpreter for the local bridge.
pub const DEFAULT_PYTHON: &str = "python";

/// Default location of the local bridge script, relative to the working directory.
pub const DEFAULT_BRIDGE_SCRIPT: &str = "python/bridge.py";

/// Which bridge transport handles tool calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMode {
    /// Spawn `python <script>` per call and talk JSON over stdio.
    Local { python: String, script: PathBuf },
    /// POST to a remote bridge server.
    Remote { url: String, token: Option<String> },
}

/// Process-wide gateway configuration. Immutable after startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    /// Shared secret expected in the `auth` header. `None` means tool routes refuse to serve.
    pub auth_token: Option<String>,
    pub bridge: BridgeMode,
    /// MetaTrader terminal path. Only checked for presence at startup.
    pub mt5_path: Option<String>,
    /// File-provided variables absent from the process environment, injected into local bridge processes.
    pub bridge_env: HashMap<String, String>,
}

impl GatewayConfig {
    /// Resolve configuration from the process environment plus env-file variables.
    pub fn from_env(file_vars: HashMap<String, String>) -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), file_vars)
    }

    /// Resolve configuration from an arbitrary environment lookup plus env-file variables.
    ///
    /// A key present in `lookup` wins over the same key in `file_vars`, even
    /// when its value is empty. Empty values are then treated as unset.
    pub fn from_lookup<F>(lookup: F, file_vars: HashMap<String, String>) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(key)
                .or_else(|| file_vars.get(key).cloned())
                .filter(|v| !v.is_empty())
        };

        let port = match get("NODE_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                GatewayError::Config(format!("NODE_PORT must be a port number, got '{}'", raw))
            })?,
            None => DEFAULT_PORT,
        };

        let auth_token = get("AUTH_TOKEN");

        let bridge = match get("MT5_BRIDGE_URL") {
            Some(url) => {
                let parsed = reqwest::Url::parse(&url).map_err(|e| {
                    GatewayError::Config(format!("MT5_BRIDGE_URL '{}' is not a valid URL: {}", url, e))
                })?;
                if parsed.cannot_be_a_base() {
                    return Err(GatewayError::Config(format!(
                        "MT5_BRIDGE_URL '{}' must be an http(s) base URL",
                        url
                    )));
                }
                BridgeMode::Remote {
                    url,
                    token: get("MT5_BRIDGE_TOKEN").or_else(|| auth_token.clone()),
                }
            }
            None => BridgeMode::Local {
                python: get("PYTHON_EXECUTABLE").unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
                script: get("MT5_BRIDGE_SCRIPT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BRIDGE_SCRIPT)),
            },
        };

        let mt5_path = get("MT5_PATH");

        let bridge_env = file_vars
            .iter()
            .filter(|(key, _)| lookup(key).is_none())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            port,
            auth_token,
            bridge,
            mt5_path,
            bridge_env,
        })
    }

    /// Whether tool routes are protected by a token at all.
    pub fn require_auth(&self) -> bool {
        self.auth_token.is_some()
    }
}

/// Parse `KEY=value` lines.
///
/// Blank lines, `#` comments and lines without `=` are skipped. Keys and
/// values are trimmed; only the first `=` separates them.
pub fn parse_env_file(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.trim().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Load an env file into a map. A missing file yields an empty map.
///
/// When a key repeats, the first occurrence wins.
pub fn load_env_file(path: &Path) -> crate::Result<HashMap<String, String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(GatewayError::Config(format!(
                "failed to read env file {}: {}",
                path.display(),
                e
            )));
        }
    };

    let mut vars = HashMap::new();
    for (key, value) in parse_env_file(&text) {
        vars.entry(key).or_insert(value);
    }
    tracing::debug!(path = %path.display(), count = vars.len(), "loaded env file");
    Ok(vars)
}
