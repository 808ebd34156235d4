//! toolbox-core: Connection pool for grouped MCP servers
//!
//! Provides:
//! - Configuration loading with `${VAR}` / `${VAR:-default}` expansion
//! - MCP client over child-process stdio
//! - Connection pool that opens toolboxes and routes tool calls
//!   addressed by (toolbox, server, tool)

pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod identifier;
pub mod mcp;
pub mod pool;

#[cfg(test)]
mod testing;

pub use config::{ServerLaunchSpec, ToolFilter, ToolboxDefinition, ToolboxSummary, ToolboxesConfig};
pub use connection::{Connection, Launcher, StdioLauncher};
pub use error::ToolboxError;
pub use identifier::ToolIdentifier;
pub use pool::{CapabilityDescriptor, ConnectionPool, OpenToolbox, ToolboxSnapshot};
