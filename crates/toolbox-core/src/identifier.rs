//! The (toolbox, server, tool) triple that addresses one tool.

use crate::error::ToolboxError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured address of a tool across the whole pool.
///
/// The three parts are never joined into one string for lookup; a tool name
/// may contain any character, including ones other systems use as separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolIdentifier {
    pub toolbox: String,
    pub server: String,
    /// The tool's own name, as advertised by its server
    #[serde(rename = "capability")]
    pub tool: String,
}

impl ToolIdentifier {
    pub fn new(
        toolbox: impl Into<String>,
        server: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            toolbox: toolbox.into(),
            server: server.into(),
            tool: tool.into(),
        }
    }

    /// Reject empty fields, checked in toolbox, server, tool order.
    pub fn validate(&self) -> Result<(), ToolboxError> {
        let fields = [
            ("toolbox", &self.toolbox),
            ("server", &self.server),
            ("capability", &self.tool),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(ToolboxError::InvalidIdentifier { field });
            }
        }
        Ok(())
    }
}

impl fmt::Display for ToolIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "toolbox '{}', server '{}', tool '{}'",
            self.toolbox, self.server, self.tool
        )
    }
}
