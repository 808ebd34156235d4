//! MCP (Model Context Protocol) client support
//!
//! Talks to downstream MCP servers over their stdio pipes.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  McpClient      │ ──▶ │  StdioTransport │ ──▶ │  MCP Server     │
//! │  initialize     │     │  JSON-RPC lines │     │  (child proc)   │
//! │  tools/list     │     │  stdin / stdout │     │                 │
//! │  tools/call     │     │                 │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```

pub mod client;
pub mod transport;

pub use client::{InitializeResult, McpClient, McpToolInfo, MCP_PROTOCOL_VERSION};
pub use transport::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpTransport, StdioTransport};
