//! One live downstream server bound to a (toolbox, server) pair.

use crate::config::{ServerLaunchSpec, TransportKind};
use crate::mcp::{McpClient, McpToolInfo, McpTransport, StdioTransport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Starts the transport for a server spec.
///
/// The pool goes through this seam so tests can substitute in-process servers.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &ServerLaunchSpec) -> Result<Box<dyn McpTransport>>;
}

/// Spawns servers as child processes speaking stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

#[async_trait]
impl Launcher for StdioLauncher {
    async fn launch(&self, spec: &ServerLaunchSpec) -> Result<Box<dyn McpTransport>> {
        match spec.transport {
            TransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(spec).await?)),
        }
    }
}

/// A ready connection: handshake done, tools listed and filtered.
pub struct Connection {
    toolbox: String,
    server: String,
    client: McpClient,
    tools: Vec<McpToolInfo>,
    created_at: DateTime<Utc>,
}

impl Connection {
    /// Launch, initialize and list tools, bounded by the server's `timeout_secs`.
    ///
    /// On any failure the transport is closed before the error is returned.
    pub async fn connect(
        toolbox: &str,
        spec: &ServerLaunchSpec,
        launcher: &dyn Launcher,
    ) -> Result<Self> {
        let limit = Duration::from_secs(spec.timeout_secs);
        debug!(toolbox, server = %spec.name, command = %spec.command, "connecting");

        let transport = timeout(limit, launcher.launch(spec))
            .await
            .map_err(|_| anyhow!("timed out after {}s while starting", spec.timeout_secs))??;
        let client = McpClient::new(transport);

        let discovered = match timeout(limit, handshake(&client)).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                close_quietly(&client, toolbox, &spec.name).await;
                return Err(e);
            }
            Err(_) => {
                close_quietly(&client, toolbox, &spec.name).await;
                return Err(anyhow!(
                    "timed out after {}s waiting for initialize and tools/list",
                    spec.timeout_secs
                ));
            }
        };

        let tools = filter_tools(toolbox, spec, discovered);
        info!(toolbox, server = %spec.name, tools = tools.len(), "connected");

        Ok(Self {
            toolbox: toolbox.to_string(),
            server: spec.name.clone(),
            client,
            tools,
            created_at: Utc::now(),
        })
    }

    pub fn toolbox(&self) -> &str {
        &self.toolbox
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Tools in the order the server listed them, after filtering
    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&McpToolInfo> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Forward a call under the tool's original name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.client.call_tool(name, arguments).await
    }

    /// Close without waiting for calls in flight; they fail instead.
    pub async fn close(&self) -> Result<()> {
        debug!(
            toolbox = %self.toolbox,
            server = %self.server,
            uptime_secs = (Utc::now() - self.created_at).num_seconds(),
            "closing connection"
        );
        self.client.close().await
    }

    /// Kill the server outright, for when a close overruns its budget
    pub async fn kill(&self) -> Result<()> {
        warn!(toolbox = %self.toolbox, server = %self.server, "killing server");
        self.client.kill().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("toolbox", &self.toolbox)
            .field("server", &self.server)
            .field("tools", &self.tools.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

async fn handshake(client: &McpClient) -> Result<Vec<McpToolInfo>> {
    let init = client.initialize().await?;
    debug!(
        "initialized {} v{} (protocol {})",
        init.server_info.name,
        init.server_info.version.as_deref().unwrap_or("unknown"),
        init.protocol_version
    );
    if init.capabilities.tools.is_none() {
        warn!(server = %init.server_info.name, "server does not advertise the tools capability");
    }
    client.list_tools().await
}

async fn close_quietly(client: &McpClient, toolbox: &str, server: &str) {
    if let Err(e) = client.close().await {
        warn!(toolbox, server, "error closing failed connection: {:#}", e);
    }
}

fn filter_tools(toolbox: &str, spec: &ServerLaunchSpec, tools: Vec<McpToolInfo>) -> Vec<McpToolInfo> {
    if let crate::config::ToolFilter::Only(allowed) = &spec.tools {
        for name in allowed {
            if !tools.iter().any(|t| &t.name == name) {
                warn!(toolbox, server = %spec.name, tool = %name, "allow-listed tool is not offered by server");
            }
        }
    }

    tools
        .into_iter()
        .filter(|t| spec.tools.allows(&t.name))
        .collect()
}
