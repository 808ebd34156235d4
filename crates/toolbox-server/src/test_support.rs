//! In-process downstream servers for handler and stdio tests.

use crate::handler::ToolboxHandler;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use toolbox_core::mcp::{JsonRpcRequest, JsonRpcResponse, McpTransport, MCP_PROTOCOL_VERSION};
use toolbox_core::{ConnectionPool, Launcher, ServerLaunchSpec, ToolboxDefinition, ToolboxesConfig};

/// Launches servers that echo their arguments back; unknown commands fail to start.
///
/// A tool named `hang` never answers.
#[derive(Clone, Default)]
pub(crate) struct EchoLauncher {
    servers: HashMap<String, Vec<String>>,
}

impl EchoLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_server<const N: usize>(mut self, command: &str, tools: [&str; N]) -> Self {
        self.servers.insert(
            command.to_string(),
            tools.iter().map(|t| t.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl Launcher for EchoLauncher {
    async fn launch(&self, spec: &ServerLaunchSpec) -> Result<Box<dyn McpTransport>> {
        let Some(tools) = self.servers.get(&spec.command) else {
            bail!("executable `{}` not found on PATH", spec.command);
        };
        Ok(Box::new(EchoTransport {
            tag: spec.command.clone(),
            tools: tools.clone(),
            open: AtomicBool::new(true),
        }))
    }
}

struct EchoTransport {
    tag: String,
    tools: Vec<String>,
    open: AtomicBool,
}

#[async_trait]
impl McpTransport for EchoTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let params = request.params.unwrap_or_default();
        let result = match request.method.as_str() {
            "initialize" => json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": self.tag}
            }),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                    .collect();
                json!({ "tools": tools })
            }
            "tools/call" if params["name"] == "hang" => std::future::pending().await,
            "tools/call" => json!({
                "content": [{
                    "type": "text",
                    "text": format!("{}:{}", self.tag, params["name"].as_str().unwrap_or_default())
                }],
                "echo": params["arguments"],
            }),
            other => bail!("unexpected method {}", other),
        };
        Ok(serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
        )?)
    }

    async fn send_notification(&self, _method: &str, _params: Option<Value>) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn handler_with(toolboxes: Vec<ToolboxDefinition>, launcher: EchoLauncher) -> ToolboxHandler {
    let config = Arc::new(ToolboxesConfig::new(toolboxes).unwrap());
    let pool = Arc::new(ConnectionPool::with_launcher(config, Arc::new(launcher)));
    ToolboxHandler::new(pool)
}
