//! mt5-gateway: HTTP gateway for MetaTrader 5 bridge tools.
//!
//! Two subcommands:
//! - `mt5-gateway serve`: authenticated HTTP server for `/v1/tools/{name}`
//! - `mt5-gateway call`: run one tool through the configured bridge and print the result

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mt5_gateway::{
    build_transport, load_env_file, AppState, BridgeMode, BridgeTransport, GatewayConfig,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// mt5-gateway: HTTP gateway for MetaTrader 5 bridge tools.
#[derive(Parser)]
#[command(
    name = "mt5-gateway",
    version,
    about = "HTTP gateway for MetaTrader 5 bridge tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve bridge tools over HTTP
    Serve {
        /// Path to a KEY=VALUE env file [default: ./.env or ~/.config/mt5-gateway/.env]
        #[arg(short, long)]
        env_file: Option<PathBuf>,
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// HTTP port to listen on [default: NODE_PORT or 8080]
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Invoke a single tool and print its result as JSON
    Call {
        /// Tool name, e.g. get_version
        tool: String,
        /// Tool parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Path to a KEY=VALUE env file [default: ./.env or ~/.config/mt5-gateway/.env]
        #[arg(short, long)]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity; stdout is reserved for `call` output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down mt5-gateway...");
        cancel_for_signal.cancel();
    });

    match cli.command {
        Commands::Serve {
            env_file,
            host,
            port,
        } => {
            let config = load_config(env_file)?;
            run_serve(config, host, port, cancel).await?;
        }
        Commands::Call {
            tool,
            params,
            env_file,
        } => {
            let config = load_config(env_file)?;
            run_call(config, tool, params, cancel).await?;
        }
    }

    Ok(())
}

/// Serve the gateway until Ctrl-C.
async fn run_serve(
    config: GatewayConfig,
    host: String,
    port: Option<u16>,
    cancel: CancellationToken,
) -> Result<()> {
    let port = port.unwrap_or(config.port);

    if config.mt5_path.is_none() {
        tracing::warn!("MT5_PATH is not set; the bridge will rely on its own terminal discovery");
    }
    if !config.require_auth() {
        tracing::warn!("AUTH_TOKEN is not set; every tool call will be rejected");
    }
    match &config.bridge {
        BridgeMode::Local { python, script } => {
            tracing::info!(python = %python, script = %script.display(), "Using local bridge");
        }
        BridgeMode::Remote { url, .. } => {
            tracing::info!(url = %url, "Using remote bridge");
        }
    }

    let bridge = build_transport(&config).context("Failed to build bridge transport")?;
    let listener = mt5_gateway::bind(&host, port).await?;

    tracing::info!(host = %host, port = %port, "mt5-gateway listening");

    mt5_gateway::serve(listener, AppState::new(config, bridge), cancel).await?;

    tracing::info!("mt5-gateway stopped");
    Ok(())
}

/// Run one tool and print its result to stdout.
async fn run_call(
    config: GatewayConfig,
    tool: String,
    params: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let params = parse_params(params.as_deref())?;
    let bridge = build_transport(&config).context("Failed to build bridge transport")?;

    tracing::info!(tool = %tool, mode = bridge.mode(), "Calling tool");
    let result = bridge
        .invoke(&tool, params, Some(cancel))
        .await
        .with_context(|| format!("Tool '{}' failed", tool))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Parse `--params`; absent means `{}`, anything but an object is rejected.
fn parse_params(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => anyhow::bail!("--params must be a JSON object, got {}", other),
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<GatewayConfig> {
    let file_vars = match resolve_env_file(explicit)? {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading env file");
            load_env_file(&path)?
        }
        None => HashMap::new(),
    };
    Ok(GatewayConfig::from_env(file_vars)?)
}

/// Resolve env file path: explicit flag → ./.env → ~/.config/mt5-gateway/.env.
///
/// An explicit path must exist; the fallbacks are optional.
fn resolve_env_file(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Env file {} does not exist", path.display());
        }
        return Ok(Some(path));
    }

    let local = Path::new(".env");
    if local.exists() {
        return Ok(Some(local.to_path_buf()));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user = config_dir.join("mt5-gateway").join(".env");
        if user.exists() {
            return Ok(Some(user));
        }
    }

    Ok(None)
}
