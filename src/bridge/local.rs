//! Local subprocess bridge.
//!
//! Every call spawns a fresh bridge process (by default `python python/bridge.py`),
//! writes one JSON request to its stdin, closes stdin, and reads one JSON
//! envelope back from stdout once the process exits. No process is reused.
//!
//! The child is spawned with `kill_on_drop`, so it cannot outlive the call on
//! any exit path. Cancellation kills it explicitly.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::bridge::{cancelled, BridgeEnvelope, BridgeTransport, ToolRequest};
use crate::error::BridgeError;

/// Bridge that runs each tool call in a short-lived subprocess.
#[derive(Debug, Clone)]
pub struct LocalBridge {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

/// Raw result of one bridge process run.
struct ProcessOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl LocalBridge {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Extra environment variables for every spawned bridge process.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BridgeTransport for LocalBridge {
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

        let payload = serde_json::to_vec(&ToolRequest {
            tool,
            params: &params,
        })
        .map_err(|e| BridgeError::Io(format!("failed to encode request: {}", e)))?;

        let start = Instant::now();
        let mut child = self.command().spawn().map_err(|e| BridgeError::Spawn {
            program: self.program.clone(),
            cause: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Io("failed to open stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Io("failed to open stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Io("failed to open stderr pipe".to_string()))?;

        let output = tokio::select! {
            result = run_to_exit(&mut child, stdin, stdout, stderr, payload) => result?,
            _ = cancelled(cancel.as_ref()) => {
                tracing::info!(tool = %tool, "bridge call cancelled, terminating bridge process");
                let _ = child.kill().await;
                return Err(BridgeError::Cancelled);
            }
        };

        tracing::info!(
            tool = %tool,
            exit_code = ?output.code,
            duration_ms = %start.elapsed().as_millis(),
            "local bridge invocation"
        );
        if !output.stderr.is_empty() {
            tracing::debug!(tool = %tool, stderr = %output.stderr, "bridge stderr");
        }

        interpret_output(&output)
    }

    fn mode(&self) -> &'static str {
        "local"
    }
}

/// Feed the request to the child and drain both output pipes until it exits.
///
/// stdin is written concurrently with the reads so a chatty bridge cannot
/// deadlock against a full pipe.
async fn run_to_exit(
    child: &mut Child,
    mut stdin: ChildStdin,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    payload: Vec<u8>,
) -> Result<ProcessOutput, BridgeError> {
    let write = async move {
        let written = stdin.write_all(&payload).await;
        drop(stdin);
        written
    };
    let read_stdout = async {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await.map(|_| buf)
    };

    let (written, stdout_bytes, stderr_bytes) = tokio::join!(write, read_stdout, read_stderr);
    if let Err(e) = written {
        // A bridge that exits without reading its input closes the pipe on us.
        tracing::debug!(error = %e, "bridge closed stdin before the request was written");
    }
    let stdout_bytes = stdout_bytes.map_err(|e| BridgeError::Io(e.to_string()))?;
    let stderr_bytes = stderr_bytes.map_err(|e| BridgeError::Io(e.to_string()))?;

    let status = child
        .wait()
        .await
        .map_err(|e| BridgeError::Io(format!("process wait error: {}", e)))?;

    Ok(ProcessOutput {
        code: status.code(),
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
    })
}

/// Turn a finished bridge run into the tool result or an error.
///
/// Precedence: stderr-only output fails with stderr; unparsable stdout fails
/// with stderr or a generic message; a non-zero exit or `ok:false` fails
/// with the envelope error, then stderr, then the exit code.
fn interpret_output(output: &ProcessOutput) -> Result<Value, BridgeError> {
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();

    if stdout.is_empty() && !stderr.is_empty() {
        return Err(BridgeError::Failed {
            message: stderr.to_string(),
            details: None,
            traceback: None,
        });
    }

    // Only a truly empty stdout is the empty envelope; whitespace is not JSON.
    let raw = if output.stdout.is_empty() { "{}" } else { output.stdout.as_str() };
    let parsed: Value = serde_json::from_str(raw).map_err(|_| {
        if stderr.is_empty() {
            BridgeError::InvalidResponse("Invalid JSON from bridge".to_string())
        } else {
            BridgeError::InvalidResponse(stderr.to_string())
        }
    })?;
    let envelope = BridgeEnvelope::from_value(parsed);

    if output.code != Some(0) || envelope.is_failure() {
        let message = envelope
            .error_message()
            .or_else(|| (!stderr.is_empty()).then(|| stderr.to_string()))
            .unwrap_or_else(|| match output.code {
                Some(code) => format!("Bridge process exited with code {}", code),
                None => "Bridge process terminated by signal".to_string(),
            });
        return Err(BridgeError::Failed {
            message,
            details: envelope.details,
            traceback: envelope.traceback,
        });
    }

    Ok(envelope.into_result())
}
