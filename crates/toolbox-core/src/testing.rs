//! In-process MCP servers for unit tests.

use crate::config::ServerLaunchSpec;
use crate::connection::Launcher;
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpTransport, MCP_PROTOCOL_VERSION};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Stats {
    launched: AtomicUsize,
    closed: AtomicUsize,
    calls: parking_lot::Mutex<Vec<(String, Value)>>,
}

/// Scripted MCP server. Clones share their counters.
#[derive(Clone, Default)]
pub(crate) struct FakeServer {
    tools: Vec<String>,
    fail_initialize: bool,
    hang: bool,
    list_delay: Option<Duration>,
    tag: String,
    stats: Arc<Stats>,
}

impl FakeServer {
    pub(crate) fn new(tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub(crate) fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub(crate) fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub(crate) fn launched(&self) -> usize {
        self.stats.launched.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.launched() - self.closed()
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.stats.calls.lock().clone()
    }

    async fn answer(&self, method: &str, params: Option<Value>) -> Result<Value, (i64, String)> {
        match method {
            "initialize" => {
                if self.hang {
                    std::future::pending::<()>().await;
                }
                if self.fail_initialize {
                    return Err((-32603, "initialize refused".to_string()));
                }
                Ok(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.tag, "version": "0.0.1"}
                }))
            }
            "tools/list" => {
                if let Some(delay) = self.list_delay {
                    tokio::time::sleep(delay).await;
                }
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "description": format!("{} from {}", name, self.tag),
                            "inputSchema": {"type": "object"},
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = params.unwrap_or_default();
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let arguments = params["arguments"].clone();
                self.stats.calls.lock().push((name.clone(), arguments.clone()));

                if name == "stall" {
                    std::future::pending::<()>().await;
                }
                if name == "explode" {
                    return Err((-32000, "boom".to_string()));
                }
                if !self.tools.contains(&name) {
                    return Err((-32602, format!("unknown tool {}", name)));
                }
                Ok(json!({
                    "content": [{"type": "text", "text": format!("{}:{}", self.tag, name)}],
                    "echo": arguments,
                }))
            }
            other => Err((-32601, format!("method not found: {}", other))),
        }
    }
}

struct FakeTransport {
    server: FakeServer,
    open: AtomicBool,
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            bail!("transport closed");
        }
        let body = match self.server.answer(&request.method, request.params).await {
            Ok(result) => json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "error": {"code": code, "message": message}
            }),
        };
        Ok(serde_json::from_value(body)?)
    }

    async fn send_notification(&self, _method: &str, _params: Option<Value>) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.server.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Maps launch commands to fake servers; unknown commands fail like a missing binary.
#[derive(Clone, Default)]
pub(crate) struct FakeLauncher {
    servers: HashMap<String, FakeServer>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_server(mut self, command: &str, mut server: FakeServer) -> Self {
        server.tag = command.to_string();
        self.servers.insert(command.to_string(), server);
        self
    }

    pub(crate) fn server(&self, command: &str) -> FakeServer {
        self.servers[command].clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, spec: &ServerLaunchSpec) -> Result<Box<dyn McpTransport>> {
        let Some(server) = self.servers.get(&spec.command) else {
            bail!("executable `{}` not found on PATH", spec.command);
        };
        server.stats.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransport {
            server: server.clone(),
            open: AtomicBool::new(true),
        }))
    }
}
