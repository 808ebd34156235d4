//! Error types for the connection pool.

use thiserror::Error;

/// Errors surfaced by [`ConnectionPool`](crate::pool::ConnectionPool) operations.
///
/// Every variant names the toolbox, server or tool it concerns so callers can
/// tell which coordinate was wrong.
#[derive(Debug, Error)]
pub enum ToolboxError {
    /// The toolbox is not in the static configuration.
    #[error("toolbox '{name}' not found in configuration (known toolboxes: {})", known_list(.known))]
    UnknownToolbox { name: String, known: Vec<String> },

    /// A server of the toolbox could not be spawned, initialized or listed.
    #[error("failed to open toolbox '{toolbox}': server '{server}' failed to connect: {source:#}")]
    Connect {
        toolbox: String,
        server: String,
        #[source]
        source: anyhow::Error,
    },

    /// The toolbox is configured but has not been opened.
    #[error("toolbox '{toolbox}' not found: it is not open (call open_toolbox first)")]
    ToolboxNotOpen { toolbox: String },

    /// The toolbox is open but has no server of that name.
    #[error("server '{server}' not found in toolbox '{toolbox}'")]
    ServerNotFound { toolbox: String, server: String },

    /// The server is connected but does not offer that tool.
    #[error("tool '{tool}' not found in server '{server}' (toolbox '{toolbox}')")]
    ToolNotFound {
        toolbox: String,
        server: String,
        tool: String,
    },

    /// A required identifier field was empty.
    #[error("invalid tool identifier: '{field}' must be a non-empty string")]
    InvalidIdentifier { field: &'static str },

    /// The downstream server failed the call.
    #[error("tool '{tool}' in server '{server}' (toolbox '{toolbox}') failed: {source:#}")]
    Invocation {
        toolbox: String,
        server: String,
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

fn known_list(known: &[String]) -> String {
    if known.is_empty() {
        "none".to_string()
    } else {
        known.join(", ")
    }
}
