//! MCP transport layer
//!
//! Newline-delimited JSON-RPC 2.0 over the stdio pipes of a child process.

use crate::config::ServerLaunchSpec;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// How long a child gets to exit on its own after stdin is closed and
/// SIGTERM is sent, before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response carrying the same id
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if transport is still connected
    fn is_connected(&self) -> bool;

    /// Close the transport and release the peer.
    ///
    /// Must not wait for an in-flight `send_request`; that call fails instead.
    async fn close(&self) -> Result<()>;

    /// Stop the peer immediately
    async fn kill(&self) -> Result<()> {
        self.close().await
    }
}

/// Stdio transport for MCP servers running as child processes
pub struct StdioTransport {
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create a new stdio transport from a running process
    pub fn new(mut child: Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .context("Failed to capture stdin of MCP server")?;
        let stdout = child
            .stdout
            .take()
            .context("Failed to capture stdout of MCP server")?;

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            connected: AtomicBool::new(true),
        })
    }

    /// Spawn the process described by `spec` and wrap its pipes
    pub async fn spawn(spec: &ServerLaunchSpec) -> Result<Self> {
        check_executable(spec)?;

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", spec.command))?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(spec.name.clone(), stderr);
        }

        debug!(server = %spec.name, pid = ?child.id(), "spawned MCP server");
        Self::new(child)
    }

    /// Read the next JSON message from stdout
    async fn read_message(&self) -> Result<Value> {
        let mut stdout = self.stdout.lock().await;

        loop {
            let mut line = String::new();
            let read = stdout
                .read_line(&mut line)
                .await
                .context("Failed to read from MCP server")?;

            if read == 0 {
                self.connected.store(false, Ordering::SeqCst);
                bail!("MCP server closed connection");
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str(trimmed) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    // Stray log output on stdout is common; it is not a protocol frame.
                    warn!("Ignoring non-JSON output from MCP server: {} ({})", trimmed, e);
                }
            }
        }
    }

    /// Write a message to stdin
    async fn write_message(&self, value: &Value) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().context("MCP server stdin is closed")?;
        let json = serde_json::to_string(value)?;
        trace!("MCP TX: {}", json);

        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let request_id = request.id;

        let value = serde_json::to_value(&request)?;
        self.write_message(&value).await?;

        // Read until the response matching our id shows up
        loop {
            let message = self.read_message().await?;

            if message.get("method").is_some() {
                // Notification or server-initiated request
                trace!("Skipping MCP server message: {}", message);
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(message)
                .context("Failed to parse JSON-RPC response")?;

            if response.id == Some(request_id) {
                return Ok(response);
            }
            debug!(expected = request_id, got = ?response.id, "Discarding unmatched response");
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        self.write_message(&notification).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);

        // EOF on stdin is the polite shutdown request for stdio servers
        drop(self.stdin.lock().await.take());

        let mut child = self.child.lock().await;
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, "SIGTERM failed: {}", e);
            }
        }

        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e).context("Failed to wait for MCP server"),
            Err(_) => {
                warn!("MCP server did not exit in time, killing it");
                child.kill().await.context("Failed to kill MCP server")
            }
        }
    }

    async fn kill(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        child.kill().await.context("Failed to kill MCP server")
    }
}

/// Fail early with a readable message when a bare command is not on PATH.
fn check_executable(spec: &ServerLaunchSpec) -> Result<()> {
    let is_path = spec.command.contains('/') || spec.command.contains(std::path::MAIN_SEPARATOR);
    if is_path || spec.env.contains_key("PATH") {
        return Ok(());
    }

    which::which(&spec.command)
        .map(|_| ())
        .with_context(|| format!("executable `{}` not found on PATH", spec.command))
}

/// Downstream servers log on stderr; relay it so the pipe never fills up.
fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %server, "stderr: {}", line);
        }
    });
}
