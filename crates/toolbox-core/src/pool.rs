//! Connection pool: open toolboxes, resolve identifiers, route calls.
//!
//! Each toolbox moves `Unopened → Opening → Open`. A failed open rolls back to
//! `Unopened` with every connection it made closed; the only way out of `Open`
//! is [`ConnectionPool::shutdown`].

use crate::config::{ToolboxDefinition, ToolboxSummary, ToolboxesConfig};
use crate::connection::{Connection, Launcher, StdioLauncher};
use crate::error::ToolboxError;
use crate::identifier::ToolIdentifier;
use crate::mcp::McpToolInfo;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Wall-clock budget for closing every connection at shutdown.
pub const DEFAULT_SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// How long to wait for killed servers to be reaped once the budget is spent.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// One invocable tool, addressed by its (toolbox, server, name) triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub server: String,
    pub toolbox: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl CapabilityDescriptor {
    fn new(connection: &Connection, tool: &McpToolInfo) -> Self {
        Self {
            name: tool.name.clone(),
            server: connection.server().to_string(),
            toolbox: connection.toolbox().to_string(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            annotations: tool.annotations.clone(),
        }
    }

    pub fn identifier(&self) -> ToolIdentifier {
        ToolIdentifier::new(&self.toolbox, &self.server, &self.name)
    }
}

/// What `open` reports about a toolbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolboxSnapshot {
    pub toolbox: String,
    pub description: String,
    pub servers_connected: usize,
    /// Server-definition order, then each server's discovery order
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// A toolbox whose servers are all connected.
#[derive(Debug)]
pub struct OpenToolbox {
    definition: ToolboxDefinition,
    /// In server-definition order
    connections: Vec<Arc<Connection>>,
}

impl OpenToolbox {
    pub fn connection(&self, server: &str) -> Option<&Arc<Connection>> {
        self.connections.iter().find(|c| c.server() == server)
    }

    pub fn snapshot(&self) -> ToolboxSnapshot {
        let capabilities = self
            .connections
            .iter()
            .flat_map(|conn| {
                conn.tools()
                    .iter()
                    .map(move |tool| CapabilityDescriptor::new(conn, tool))
            })
            .collect();

        ToolboxSnapshot {
            toolbox: self.definition.name.clone(),
            description: self.definition.description.clone(),
            servers_connected: self.connections.len(),
            capabilities,
        }
    }
}

/// Slot for one toolbox; empty while unopened, filled once open.
type Slot = Arc<OnceCell<Arc<OpenToolbox>>>;

/// Owns every open toolbox and the connections inside them.
pub struct ConnectionPool {
    config: Arc<ToolboxesConfig>,
    launcher: Arc<dyn Launcher>,
    toolboxes: Mutex<HashMap<String, Slot>>,
    shutdown_budget: Duration,
}

impl ConnectionPool {
    /// Create a pool that spawns servers as child processes
    pub fn new(config: Arc<ToolboxesConfig>) -> Self {
        Self::with_launcher(config, Arc::new(StdioLauncher))
    }

    pub fn with_launcher(config: Arc<ToolboxesConfig>, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            toolboxes: Mutex::new(HashMap::new()),
            shutdown_budget: DEFAULT_SHUTDOWN_BUDGET,
        }
    }

    pub fn with_shutdown_budget(mut self, budget: Duration) -> Self {
        self.shutdown_budget = budget;
        self
    }

    /// Static toolbox listing; touches no connections
    pub fn summaries(&self) -> Vec<ToolboxSummary> {
        self.config.summaries()
    }

    /// Open a toolbox, or return the snapshot of the already-open one.
    ///
    /// Concurrent calls for the same toolbox share one attempt. All servers are
    /// connected concurrently; if any fails, the ones that succeeded are closed
    /// and nothing is kept.
    pub async fn open(&self, name: &str) -> Result<ToolboxSnapshot, ToolboxError> {
        let definition = self
            .config
            .toolbox(name)
            .ok_or_else(|| ToolboxError::UnknownToolbox {
                name: name.to_string(),
                known: self.config.names(),
            })?;

        let slot = self
            .toolboxes
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();

        if let Some(open) = slot.get() {
            debug!(toolbox = name, "toolbox already open");
            return Ok(open.snapshot());
        }

        let open = slot
            .get_or_try_init(|| async {
                self.connect_toolbox(definition).await.map(Arc::new)
            })
            .await?;

        Ok(open.snapshot())
    }

    async fn connect_toolbox(
        &self,
        definition: &ToolboxDefinition,
    ) -> Result<OpenToolbox, ToolboxError> {
        info!(
            toolbox = %definition.name,
            servers = definition.servers.len(),
            "opening toolbox"
        );

        let attempts = definition.servers.iter().map(|spec| async move {
            let result =
                Connection::connect(&definition.name, spec, self.launcher.as_ref()).await;
            (spec.name.as_str(), result)
        });

        // join_all keeps input order, so results line up with the definition
        let mut connections = Vec::with_capacity(definition.servers.len());
        let mut failure = None;
        for (server, result) in join_all(attempts).await {
            match result {
                Ok(conn) => connections.push(Arc::new(conn)),
                Err(e) if failure.is_none() => failure = Some((server, e)),
                Err(e) => warn!(
                    toolbox = %definition.name,
                    server,
                    "server also failed to connect: {:#}",
                    e
                ),
            }
        }

        if let Some((server, source)) = failure {
            warn!(
                toolbox = %definition.name,
                server,
                rollback = connections.len(),
                "open failed, closing connected servers"
            );
            close_all(&connections).await;
            return Err(ToolboxError::Connect {
                toolbox: definition.name.clone(),
                server: server.to_string(),
                source,
            });
        }

        info!(toolbox = %definition.name, "toolbox open");
        Ok(OpenToolbox {
            definition: definition.clone(),
            connections,
        })
    }

    fn open_toolbox(&self, name: &str) -> Option<Arc<OpenToolbox>> {
        self.toolboxes
            .lock()
            .get(name)
            .and_then(|slot| slot.get().cloned())
    }

    /// Find the connection and tool for an identifier.
    ///
    /// Lookup goes toolbox, then server, then tool, and fails at the first
    /// level that does not match.
    pub fn resolve(
        &self,
        id: &ToolIdentifier,
    ) -> Result<(Arc<Connection>, CapabilityDescriptor), ToolboxError> {
        id.validate()?;

        let toolbox = self
            .open_toolbox(&id.toolbox)
            .ok_or_else(|| ToolboxError::ToolboxNotOpen {
                toolbox: id.toolbox.clone(),
            })?;

        let connection = toolbox
            .connection(&id.server)
            .ok_or_else(|| ToolboxError::ServerNotFound {
                toolbox: id.toolbox.clone(),
                server: id.server.clone(),
            })?;

        let tool = connection
            .tool(&id.tool)
            .ok_or_else(|| ToolboxError::ToolNotFound {
                toolbox: id.toolbox.clone(),
                server: id.server.clone(),
                tool: id.tool.clone(),
            })?;

        Ok((Arc::clone(connection), CapabilityDescriptor::new(connection, tool)))
    }

    /// Route a call to the tool's server and return its result untouched.
    ///
    /// A failed call leaves the connection in place.
    pub async fn invoke(
        &self,
        id: &ToolIdentifier,
        arguments: Value,
    ) -> Result<Value, ToolboxError> {
        let (connection, tool) = self.resolve(id)?;
        debug!(toolbox = %tool.toolbox, server = %tool.server, tool = %tool.name, "invoking");

        let result = connection.call_tool(&tool.name, arguments).await;
        result.map_err(|source| ToolboxError::Invocation {
            toolbox: tool.toolbox,
            server: tool.server,
            tool: tool.name,
            source,
        })
    }

    /// Names of the toolboxes currently open
    pub fn open_toolboxes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .toolboxes
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open_toolbox(name).is_some()
    }

    /// Close every connection of every open toolbox and empty the pool.
    ///
    /// Calls still in flight do not delay the close; they fail. Close errors
    /// are logged, and servers still running when the budget runs out are
    /// killed.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self
            .toolboxes
            .lock()
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        let connections: Vec<Arc<Connection>> = slots
            .iter()
            .filter_map(|slot| slot.get())
            .flat_map(|toolbox| toolbox.connections.iter().cloned())
            .collect();

        if connections.is_empty() {
            debug!("shutdown: no open connections");
            return;
        }

        info!(connections = connections.len(), "shutting down connection pool");
        if timeout(self.shutdown_budget, close_all(&connections)).await.is_ok() {
            info!("all connections closed");
            return;
        }

        warn!(
            budget_secs = self.shutdown_budget.as_secs_f64(),
            "shutdown budget exceeded, killing remaining servers"
        );
        let kills = join_all(connections.iter().map(|conn| async move {
            if let Err(e) = conn.kill().await {
                warn!(
                    toolbox = %conn.toolbox(),
                    server = %conn.server(),
                    "error killing server: {:#}",
                    e
                );
            }
        }));
        if timeout(KILL_WAIT, kills).await.is_err() {
            warn!("servers still exiting after kill");
        }
    }
}

async fn close_all(connections: &[Arc<Connection>]) {
    join_all(connections.iter().map(|conn| async move {
        if let Err(e) = conn.close().await {
            warn!(
                toolbox = %conn.toolbox(),
                server = %conn.server(),
                "error closing connection: {:#}",
                e
            );
        }
    }))
    .await;
}
