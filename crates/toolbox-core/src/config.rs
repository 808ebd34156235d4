//! Toolbox configuration
//!
//! Configuration file: JSON (or TOML, chosen by extension) describing each
//! toolbox and the downstream servers it launches. Placeholders are expanded
//! against the process environment before the file is parsed into types.

use crate::env;
use anyhow::{bail, Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Which tools of a server are exposed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolFilter {
    /// Every advertised tool
    #[default]
    All,
    /// Only the named tools
    Only(BTreeSet<String>),
}

impl ToolFilter {
    pub fn only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(tool),
        }
    }
}

impl<'de> Deserialize<'de> for ToolFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            Names(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(k) if k == "all" || k == "*" => Ok(Self::All),
            Repr::Keyword(other) => Err(D::Error::custom(format!(
                "expected \"all\" or a list of tool names, got \"{}\"",
                other
            ))),
            Repr::Names(names) => Ok(Self::Only(names.into_iter().collect())),
        }
    }
}

/// How the downstream server is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking JSON-RPC on stdin/stdout
    #[default]
    Stdio,
}

/// Launch parameters for one downstream MCP server
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerLaunchSpec {
    /// Server name within its toolbox (the key in the config file)
    #[serde(skip)]
    pub name: String,
    /// Command to run the server
    pub command: String,
    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Tool allow-list applied at discovery time
    #[serde(default)]
    pub tools: ToolFilter,
    #[serde(default)]
    pub transport: TransportKind,
    /// Bound on spawn + handshake + tool listing, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl ServerLaunchSpec {
    /// Create a new server spec with just name and command
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            tools: ToolFilter::All,
            transport: TransportKind::Stdio,
            timeout_secs: default_timeout(),
        }
    }

    /// Add arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolFilter) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// A named group of downstream servers
#[derive(Debug, Clone)]
pub struct ToolboxDefinition {
    pub name: String,
    pub description: String,
    /// Servers in the order they appear in the config file
    pub servers: Vec<ServerLaunchSpec>,
}

impl ToolboxDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            servers: Vec::new(),
        }
    }

    pub fn with_server(mut self, server: ServerLaunchSpec) -> Self {
        self.servers.push(server);
        self
    }

    pub fn server(&self, name: &str) -> Option<&ServerLaunchSpec> {
        self.servers.iter().find(|s| s.name == name)
    }
}

/// Static view of a toolbox used for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolboxSummary {
    pub name: String,
    pub description: String,
    pub server_count: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    toolboxes: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawToolbox {
    #[serde(default)]
    description: String,
    servers: Map<String, Value>,
}

/// Every configured toolbox, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct ToolboxesConfig {
    toolboxes: Vec<ToolboxDefinition>,
}

impl ToolboxesConfig {
    /// Build from already-typed definitions
    pub fn new(toolboxes: Vec<ToolboxDefinition>) -> Result<Self> {
        let config = Self { toolboxes };
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, expanding placeholders from the process environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let raw: Value = if is_toml {
            let table: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            serde_json::to_value(table)?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        Self::from_value(raw, &env::process_env)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse a JSON document, resolving placeholders through `lookup`
    pub fn from_json_str<F>(json: &str, lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: Value = serde_json::from_str(json).context("Failed to parse configuration")?;
        Self::from_value(raw, lookup)
    }

    /// Expand placeholders in `raw`, then parse and validate it
    pub fn from_value<F>(mut raw: Value, lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        env::expand_value(&mut raw, "", lookup)?;

        let root: RawConfig =
            serde_json::from_value(raw).context("invalid configuration root")?;

        let mut toolboxes = Vec::with_capacity(root.toolboxes.len());
        for (name, value) in root.toolboxes {
            let location = format!("toolboxes.{}", name);
            let raw: RawToolbox = serde_json::from_value(value)
                .with_context(|| format!("invalid toolbox at {}", location))?;

            let mut servers = Vec::with_capacity(raw.servers.len());
            for (server_name, value) in raw.servers {
                let mut spec: ServerLaunchSpec = serde_json::from_value(value).with_context(
                    || format!("invalid server at {}.servers.{}", location, server_name),
                )?;
                spec.name = server_name;
                servers.push(spec);
            }

            toolboxes.push(ToolboxDefinition {
                name,
                description: raw.description,
                servers,
            });
        }

        Self::new(toolboxes)
    }

    /// Default config location: `<config_dir>/mcp-toolbox/config.json`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("mcp-toolbox").join("config.json"))
            .context("Could not determine config directory")
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for toolbox in &self.toolboxes {
            if toolbox.name.is_empty() {
                bail!("toolboxes: toolbox names must not be empty");
            }
            if !seen.insert(toolbox.name.as_str()) {
                bail!("toolboxes.{}: duplicate toolbox name", toolbox.name);
            }
            if toolbox.servers.is_empty() {
                bail!(
                    "toolboxes.{}.servers: at least one server is required",
                    toolbox.name
                );
            }

            let mut server_names = BTreeSet::new();
            for server in &toolbox.servers {
                let location = format!("toolboxes.{}.servers.{}", toolbox.name, server.name);
                if server.name.is_empty() {
                    bail!("toolboxes.{}.servers: server names must not be empty", toolbox.name);
                }
                if !server_names.insert(server.name.as_str()) {
                    bail!("{}: duplicate server name", location);
                }
                if server.command.trim().is_empty() {
                    bail!("{}.command: must not be empty", location);
                }
                if server.timeout_secs == 0 {
                    bail!("{}.timeout_secs: must be greater than zero", location);
                }
            }
        }
        Ok(())
    }

    pub fn toolbox(&self, name: &str) -> Option<&ToolboxDefinition> {
        self.toolboxes.iter().find(|t| t.name == name)
    }

    /// Toolboxes in config-file order
    pub fn toolboxes(&self) -> &[ToolboxDefinition] {
        &self.toolboxes
    }

    pub fn names(&self) -> Vec<String> {
        self.toolboxes.iter().map(|t| t.name.clone()).collect()
    }

    pub fn summaries(&self) -> Vec<ToolboxSummary> {
        self.toolboxes
            .iter()
            .map(|t| ToolboxSummary {
                name: t.name.clone(),
                description: t.description.clone(),
                server_count: t.servers.len(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.toolboxes.is_empty()
    }
}
