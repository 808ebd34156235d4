//! Markdown listing of the configured toolboxes.
//!
//! Sent as the `instructions` of the `initialize` response and printed by
//! `mcp-toolbox list`.

use std::fmt::Write;
use toolbox_core::ToolboxSummary;

pub fn render_instructions(toolboxes: &[ToolboxSummary]) -> String {
    let mut out = String::new();
    out.push_str("# MCP Toolbox\n\n");
    out.push_str(
        "Tools from downstream MCP servers are grouped into toolboxes. \
         Call `open_toolbox` with a toolbox name to start its servers and list their tools, \
         then call `use_tool` with the tool's `toolbox`, `server` and `capability` name.\n\n",
    );
    out.push_str("## Available toolboxes\n\n");

    if toolboxes.is_empty() {
        out.push_str(
            "No toolboxes are configured. Add entries under `toolboxes` in the configuration file.\n",
        );
        return out;
    }

    for toolbox in toolboxes {
        let servers = match toolbox.server_count {
            1 => "1 server".to_string(),
            n => format!("{} servers", n),
        };
        let _ = write!(out, "- **{}** ({})", toolbox.name, servers);
        if !toolbox.description.is_empty() {
            let _ = write!(out, ": {}", toolbox.description);
        }
        out.push('\n');
    }
    out
}
