//! Request handling for the two front-end tools.
//!
//! The client sees exactly `open_toolbox` and `use_tool`. Failures of either
//! are reported as tool results with `isError: true` so the model can read
//! them; only protocol-level problems become JSON-RPC errors.

use crate::listing;
use crate::protocol::{error_codes, IncomingMessage, OutgoingResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use toolbox_core::mcp::MCP_PROTOCOL_VERSION;
use toolbox_core::{ConnectionPool, ToolIdentifier, ToolboxSnapshot};
use tracing::{debug, info, warn};

pub const OPEN_TOOLBOX: &str = "open_toolbox";
pub const USE_TOOL: &str = "use_tool";

const SERVER_NAME: &str = "mcp-toolbox";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpenToolboxArgs {
    toolbox: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UseToolArgs {
    identifier: ToolIdentifier,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

type RpcResult = Result<Value, (i64, String)>;

pub struct ToolboxHandler {
    pool: Arc<ConnectionPool>,
    instructions: String,
}

impl ToolboxHandler {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        let instructions = listing::render_instructions(&pool.summaries());
        Self { pool, instructions }
    }

    /// Handle one message. Notifications get no response.
    pub async fn handle(&self, message: IncomingMessage) -> Option<OutgoingResponse> {
        let Some(id) = message.id else {
            debug!(method = %message.method, "notification");
            return None;
        };

        let result = match message.method.as_str() {
            "initialize" => Ok(self.initialize(message.params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => self.call_tool(message.params).await,
            other => Err((
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            )),
        };

        Some(match result {
            Ok(value) => OutgoingResponse::success(id, value),
            Err((code, text)) => OutgoingResponse::failure(id, code, text),
        })
    }

    fn initialize(&self, params: Option<Value>) -> Value {
        let requested = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(MCP_PROTOCOL_VERSION);
        if let Some(client) = params.as_ref().and_then(|p| p.get("clientInfo")) {
            info!(client = %client, protocol = requested, "client connected");
        }

        json!({
            "protocolVersion": requested,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": self.instructions,
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> RpcResult {
        let call: CallParams = serde_json::from_value(params.unwrap_or_default())
            .map_err(|e| (error_codes::INVALID_PARAMS, format!("invalid tools/call params: {}", e)))?;
        let arguments = call.arguments.unwrap_or_else(|| json!({}));

        match call.name.as_str() {
            OPEN_TOOLBOX => Ok(self.open_toolbox(arguments).await),
            USE_TOOL => Ok(self.use_tool(arguments).await),
            other => Err((error_codes::INVALID_PARAMS, format!("unknown tool: {}", other))),
        }
    }

    /// Open a toolbox and describe every tool it offers.
    pub async fn open_toolbox(&self, arguments: Value) -> Value {
        let args: OpenToolboxArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return error_result(format!("invalid arguments for {}: {}", OPEN_TOOLBOX, e)),
        };
        if args.toolbox.is_empty() {
            return error_result(format!(
                "invalid arguments for {}: 'toolbox' must be a non-empty string",
                OPEN_TOOLBOX
            ));
        }

        match self.pool.open(&args.toolbox).await {
            Ok(snapshot) => match snapshot_result(&snapshot) {
                Ok(result) => result,
                Err(e) => {
                    warn!(toolbox = %snapshot.toolbox, "failed to encode snapshot: {}", e);
                    error_result(format!(
                        "toolbox '{}' opened but its description could not be encoded: {}",
                        snapshot.toolbox, e
                    ))
                }
            },
            Err(e) => {
                warn!("{}", e);
                error_result(e.to_string())
            }
        }
    }

    /// Forward a call to a tool in an open toolbox; its result is returned as is.
    pub async fn use_tool(&self, arguments: Value) -> Value {
        let args: UseToolArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return error_result(format!("invalid arguments for {}: {}", USE_TOOL, e)),
        };

        match self
            .pool
            .invoke(&args.identifier, Value::Object(args.arguments))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("{}", e);
                error_result(e.to_string())
            }
        }
    }
}

fn snapshot_result(snapshot: &ToolboxSnapshot) -> serde_json::Result<Value> {
    let structured = serde_json::to_value(snapshot)?;
    let text = serde_json::to_string_pretty(&structured)?;
    Ok(json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured,
        "isError": false,
    }))
}

fn error_result(text: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": true,
    })
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": OPEN_TOOLBOX,
            "description": "Start every server in a toolbox and list the tools it offers. \
                            Each tool is described with its toolbox, server and name, which \
                            together identify it for use_tool. Opening an open toolbox is cheap.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "toolbox": {
                        "type": "string",
                        "description": "Name of a configured toolbox",
                    }
                },
                "required": ["toolbox"],
                "additionalProperties": false,
            },
        },
        {
            "name": USE_TOOL,
            "description": "Call a tool from an open toolbox. The result is the downstream \
                            server's result, unchanged.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "identifier": {
                        "type": "object",
                        "properties": {
                            "toolbox": { "type": "string" },
                            "server": { "type": "string" },
                            "capability": {
                                "type": "string",
                                "description": "Tool name as reported by open_toolbox",
                            },
                        },
                        "required": ["toolbox", "server", "capability"],
                        "additionalProperties": false,
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Arguments for the tool, matching its inputSchema",
                    },
                },
                "required": ["identifier"],
                "additionalProperties": false,
            },
        },
    ])
}
