//! # MCP Server Merging
//!
//! Every package (and the workspace itself) may declare MCP servers in
//! `mcp/servers.toml`. The merger namespaces each server id into a
//! fully-qualified id `<package-name>/<server-id>`, gates each server
//! through trust, and emits one deterministic `mcp.json` per target:
//! servers sorted by fqid, sorted keys, LF, final newline, no timestamps.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::lockfile::canonical_json;

/// How a server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Local process: `command` + `args`. Implies the `exec` capability.
    Stdio,
    /// Remote endpoint reached over HTTP.
    Http,
}

/// One declared MCP server, namespaced by its owning package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServer {
    /// `<package-name>/<server-id>`.
    pub fqid: String,
    /// Display name from the declaration, possibly empty.
    pub name: String,
    pub transport: Transport,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub url: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl McpServer {
    /// A local command implies process execution.
    pub fn needs_exec(&self) -> bool {
        self.transport == Transport::Stdio
    }

    /// Remote servers only need the `mcp` capability.
    pub fn needs_mcp(&self) -> bool {
        self.transport == Transport::Http
    }
}

/// Parse `mcp/servers.toml` and namespace every server under `namespace`.
///
/// Returned servers are sorted by fqid. Duplicate ids within one file are
/// *sync* errors.
pub fn parse_servers(namespace: &str, path: &Path) -> Result<Vec<McpServer>> {
    let text = std::fs::read_to_string(path)?;
    let value: toml::Table = text.parse().map_err(|e: toml::de::Error| Error::TomlParse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;

    let invalid = |message: String| Error::ConfigInvalid {
        path: path.to_path_buf(),
        message,
    };

    match value.get("version").and_then(|v| v.as_integer()) {
        Some(1) => {}
        other => return Err(invalid(format!("unsupported servers.toml version {other:?}"))),
    }
    for key in value.keys() {
        if key != "version" && key != "server" {
            return Err(invalid(format!("unknown key: {key}")));
        }
    }

    let mut servers = Vec::new();
    let raw_servers = match value.get("server") {
        None => return Ok(servers),
        Some(v) => v
            .as_array()
            .ok_or_else(|| invalid("[[server]] must be an array of tables".to_string()))?,
    };

    for raw in raw_servers {
        let tbl = raw
            .as_table()
            .ok_or_else(|| invalid("each [[server]] must be a table".to_string()))?;
        for key in tbl.keys() {
            if !["id", "name", "command", "args", "url", "env"].contains(&key.as_str()) {
                return Err(invalid(format!("server: unknown key: {key}")));
            }
        }

        let id = tbl
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid("server.id is required".to_string()))?;
        let fqid = format!("{namespace}/{id}");
        let name = tbl
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let mut env = BTreeMap::new();
        if let Some(env_raw) = tbl.get("env") {
            let env_tbl = env_raw
                .as_table()
                .ok_or_else(|| invalid(format!("server.env for {fqid} must be a table")))?;
            for (k, v) in env_tbl {
                let val = v
                    .as_str()
                    .ok_or_else(|| invalid(format!("server.env for {fqid} must map strings")))?;
                env.insert(k.clone(), val.to_string());
            }
        }

        let server = if let Some(url_raw) = tbl.get("url") {
            if tbl.contains_key("command") || tbl.contains_key("args") {
                return Err(invalid(format!(
                    "server {fqid}: url and command are mutually exclusive"
                )));
            }
            let url = url_raw
                .as_str()
                .ok_or_else(|| invalid(format!("server.url for {fqid} must be a string")))?;
            McpServer {
                fqid,
                name,
                transport: Transport::Http,
                command: None,
                args: Vec::new(),
                url: Some(url.to_string()),
                env,
            }
        } else {
            let command = tbl
                .get("command")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid(format!("server.command for {fqid} must be a string")))?;
            let mut args = Vec::new();
            if let Some(args_raw) = tbl.get("args") {
                let arr = args_raw.as_array().ok_or_else(|| {
                    invalid(format!("server.args for {fqid} must be an array of strings"))
                })?;
                for item in arr {
                    args.push(
                        item.as_str()
                            .ok_or_else(|| {
                                invalid(format!(
                                    "server.args for {fqid} must be an array of strings"
                                ))
                            })?
                            .to_string(),
                    );
                }
            }
            McpServer {
                fqid,
                name,
                transport: Transport::Stdio,
                command: Some(command.to_string()),
                args,
                url: None,
                env,
            }
        };
        servers.push(server);
    }

    servers.sort_by(|a, b| a.fqid.cmp(&b.fqid));
    for pair in servers.windows(2) {
        if pair[0].fqid == pair[1].fqid {
            return Err(Error::DuplicateServer {
                fqid: pair[0].fqid.clone(),
            });
        }
    }
    Ok(servers)
}

/// Check a merged server list for cross-package fqid collisions. The input
/// must already be sorted by fqid.
pub fn check_collisions(servers: &[McpServer]) -> Result<()> {
    for pair in servers.windows(2) {
        if pair[0].fqid == pair[1].fqid {
            return Err(Error::DuplicateServer {
                fqid: pair[0].fqid.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ServerOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "str::is_empty")]
    notes: &'a str,
}

/// Render the merged, allowed server list as stable `mcp.json` bytes.
pub fn render_mcp_json(servers: &[McpServer]) -> Result<String> {
    let mut map: BTreeMap<&str, ServerOut<'_>> = BTreeMap::new();
    for server in servers {
        map.insert(
            &server.fqid,
            ServerOut {
                command: server.command.as_deref(),
                args: server.args.iter().map(|s| s.as_str()).collect(),
                url: server.url.as_deref(),
                env: server
                    .env
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect(),
                notes: &server.name,
            },
        );
    }
    let doc = BTreeMap::from([("mcpServers", map)]);
    canonical_json(&doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_servers(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    const POSTGRES: &str = r#"
version = 1

[[server]]
id = "postgres"
name = "Postgres access"
command = "npx"
args = ["-y", "@acme/postgres-mcp"]

[server.env]
PGHOST = "localhost"
"#;

    #[test]
    fn test_parse_stdio_server() {
        let (_dir, path) = write_servers(POSTGRES);
        let servers = parse_servers("@acme/mcp-pack", &path).unwrap();
        assert_eq!(servers.len(), 1);
        let s = &servers[0];
        assert_eq!(s.fqid, "@acme/mcp-pack/postgres");
        assert_eq!(s.transport, Transport::Stdio);
        assert!(s.needs_exec());
        assert!(!s.needs_mcp());
        assert_eq!(s.command.as_deref(), Some("npx"));
        assert_eq!(s.env["PGHOST"], "localhost");
    }

    #[test]
    fn test_parse_http_server() {
        let (_dir, path) = write_servers(
            "version = 1\n[[server]]\nid = \"search\"\nurl = \"https://mcp.example.com\"\n",
        );
        let servers = parse_servers("pkg", &path).unwrap();
        assert_eq!(servers[0].transport, Transport::Http);
        assert!(!servers[0].needs_exec());
        assert!(servers[0].needs_mcp());
    }

    #[test]
    fn test_bad_version_rejected() {
        let (_dir, path) = write_servers("version = 2\n");
        assert!(parse_servers("pkg", &path).is_err());
    }

    #[test]
    fn test_missing_id_rejected() {
        let (_dir, path) = write_servers("version = 1\n[[server]]\ncommand = \"npx\"\n");
        assert!(parse_servers("pkg", &path).is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_dir, path) = write_servers(
            "version = 1\n[[server]]\nid = \"a\"\ncommand = \"x\"\n[[server]]\nid = \"a\"\ncommand = \"y\"\n",
        );
        let err = parse_servers("pkg", &path).unwrap_err();
        assert!(matches!(err, Error::DuplicateServer { .. }));
    }

    #[test]
    fn test_unknown_server_key_rejected() {
        let (_dir, path) =
            write_servers("version = 1\n[[server]]\nid = \"a\"\ncommand = \"x\"\ncwd = \"/\"\n");
        assert!(parse_servers("pkg", &path).is_err());
    }

    #[test]
    fn test_render_is_sorted_and_stable() {
        let servers = vec![
            McpServer {
                fqid: "zz/later".to_string(),
                name: String::new(),
                transport: Transport::Http,
                command: None,
                args: vec![],
                url: Some("https://z.example".to_string()),
                env: BTreeMap::new(),
            },
            McpServer {
                fqid: "@acme/mcp-pack/postgres".to_string(),
                name: "Postgres access".to_string(),
                transport: Transport::Stdio,
                command: Some("npx".to_string()),
                args: vec!["-y".to_string()],
                url: None,
                env: BTreeMap::new(),
            },
        ];
        let out = render_mcp_json(&servers).unwrap();
        assert!(out.ends_with('\n'));
        let acme = out.find("@acme/mcp-pack/postgres").unwrap();
        let zz = out.find("zz/later").unwrap();
        assert!(acme < zz);
        assert_eq!(out, render_mcp_json(&servers).unwrap());
    }

    #[test]
    fn test_check_collisions_across_packages() {
        let mk = |fqid: &str| McpServer {
            fqid: fqid.to_string(),
            name: String::new(),
            transport: Transport::Http,
            command: None,
            args: vec![],
            url: Some("https://x".to_string()),
            env: BTreeMap::new(),
        };
        assert!(check_collisions(&[mk("a/s"), mk("b/s")]).is_ok());
        assert!(check_collisions(&[mk("a/s"), mk("a/s")]).is_err());
    }
}
