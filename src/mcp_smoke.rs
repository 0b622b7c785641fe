//! # MCP Stdio Smoke Checks
//!
//! A content digest proves a package's bytes are intact; it says nothing
//! about whether an installed MCP server actually starts. The smoke check
//! launches a stdio server, speaks the Content-Length-framed JSON-RPC
//! handshake at it (`initialize`, `tools/list`, `resources/list`), and
//! reports whether the server answered with at least one tool.
//!
//! Only trust-allowed servers are ever launched; the gating happens in the
//! caller (`botpack verify --smoke`), never here.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use log::debug;
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::mcp::McpServer;

/// Outcome of one server's smoke check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeResult {
    /// Fully-qualified server id.
    pub server: String,
    /// True when the handshake completed and the server lists a tool.
    pub ok: bool,
    pub tools: usize,
    pub resources: usize,
}

/// Write one framed JSON-RPC message.
pub fn rpc_send<W: Write>(writer: &mut W, msg: &serde_json::Value) -> Result<()> {
    let body = serde_json::to_vec(msg)?;
    write!(
        writer,
        "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed JSON-RPC message.
pub fn rpc_recv<R: BufRead>(reader: &mut R) -> Result<serde_json::Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Generic(
                "server closed pipe without response".to_string(),
            ));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        let lower = trimmed.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-length:") {
            content_length = rest.trim().parse().ok();
        }
    }
    let len = content_length
        .ok_or_else(|| Error::Generic("missing Content-Length header".to_string()))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Launch one stdio server in `cwd` and round-trip the handshake.
///
/// The child is killed when the exchange finishes, whether or not it
/// succeeded. HTTP servers are not launchable and are rejected.
pub fn run_server_smoke(server: &McpServer, cwd: &Path) -> Result<SmokeResult> {
    let command = server.command.as_deref().ok_or_else(|| Error::Generic(format!(
        "{}: not a stdio server",
        server.fqid
    )))?;

    let mut child = Command::new(command)
        .args(&server.args)
        .envs(&server.env)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::Generic(format!(
            "{}: failed to launch {command}: {e}",
            server.fqid
        )))?;

    let result = exchange(&mut child, &server.fqid);
    shutdown(&mut child);
    result
}

fn exchange(child: &mut Child, fqid: &str) -> Result<SmokeResult> {
    let mut stdin = child.stdin.take().ok_or_else(|| Error::Generic(format!(
        "{fqid}: child has no stdin"
    )))?;
    let stdout = child.stdout.take().ok_or_else(|| Error::Generic(format!(
        "{fqid}: child has no stdout"
    )))?;
    let mut reader = BufReader::new(stdout);

    rpc_send(
        &mut stdin,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )?;
    rpc_recv(&mut reader)?;

    rpc_send(
        &mut stdin,
        &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}}),
    )?;
    let tools = list_len(&rpc_recv(&mut reader)?, "tools");

    rpc_send(
        &mut stdin,
        &json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list", "params": {}}),
    )?;
    let resources = list_len(&rpc_recv(&mut reader)?, "resources");

    debug!("smoke {fqid}: {tools} tool(s), {resources} resource(s)");
    Ok(SmokeResult {
        server: fqid.to_string(),
        ok: tools >= 1,
        tools,
        resources,
    })
}

fn list_len(response: &serde_json::Value, key: &str) -> usize {
    response
        .get("result")
        .and_then(|r| r.get(key))
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0)
}

fn shutdown(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use crate::mcp::Transport;

    fn frame(body: &str) -> String {
        format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn test_rpc_framing_roundtrip() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let mut buf = Vec::new();
        rpc_send(&mut buf, &msg).unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Content-Type: application/json\r\nContent-Length: "));

        let mut reader = Cursor::new(buf);
        assert_eq!(rpc_recv(&mut reader).unwrap(), msg);
    }

    #[test]
    fn test_rpc_recv_missing_content_length() {
        let mut reader = Cursor::new(b"Content-Type: application/json\r\n\r\n{}".to_vec());
        assert!(rpc_recv(&mut reader).is_err());
    }

    #[test]
    fn test_rpc_recv_closed_pipe() {
        let mut reader = Cursor::new(Vec::new());
        let err = rpc_recv(&mut reader).unwrap_err();
        assert!(err.to_string().contains("closed pipe"));
    }

    #[test]
    fn test_rpc_recv_header_case_insensitive() {
        let body = r#"{"id":1}"#;
        let raw = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut reader = Cursor::new(raw.into_bytes());
        assert_eq!(rpc_recv(&mut reader).unwrap(), json!({"id": 1}));
    }

    fn stdio_server(command: &str, args: Vec<String>) -> McpServer {
        McpServer {
            fqid: "@acme/mcp-pack/fake".to_string(),
            name: String::new(),
            transport: Transport::Stdio,
            command: Some(command.to_string()),
            args,
            url: None,
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_smoke_launch_failure() {
        let server = stdio_server("botpack-no-such-binary-xyz", vec![]);
        let temp = tempfile::TempDir::new().unwrap();
        let err = run_server_smoke(&server, temp.path()).unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[test]
    fn test_smoke_rejects_http_server() {
        let server = McpServer {
            fqid: "pkg/remote".to_string(),
            name: String::new(),
            transport: Transport::Http,
            command: None,
            args: vec![],
            url: Some("https://mcp.example.com".to_string()),
            env: BTreeMap::new(),
        };
        let temp = tempfile::TempDir::new().unwrap();
        assert!(run_server_smoke(&server, temp.path()).is_err());
    }

    /// Drive the full exchange against a canned shell responder: it dumps
    /// three pre-framed responses and then swallows stdin so the writes
    /// never hit a closed pipe.
    #[cfg(unix)]
    #[test]
    fn test_smoke_against_canned_responder() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut frames = String::new();
        frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#));
        frames.push_str(&frame(
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"magic_number"}]}}"#,
        ));
        frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":3,"result":{"resources":[]}}"#));
        let frames_path = temp.path().join("frames.bin");
        std::fs::write(&frames_path, frames).unwrap();

        let server = stdio_server(
            "sh",
            vec![
                "-c".to_string(),
                format!("cat {}; cat >/dev/null", frames_path.display()),
            ],
        );
        let result = run_server_smoke(&server, temp.path()).unwrap();
        assert!(result.ok);
        assert_eq!(result.tools, 1);
        assert_eq!(result.resources, 0);
    }

    /// A server that answers but lists no tools is reported, not ok.
    #[cfg(unix)]
    #[test]
    fn test_smoke_no_tools_is_not_ok() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut frames = String::new();
        frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#));
        frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#));
        frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":3,"result":{"resources":[]}}"#));
        let frames_path = temp.path().join("frames.bin");
        std::fs::write(&frames_path, frames).unwrap();

        let server = stdio_server(
            "sh",
            vec![
                "-c".to_string(),
                format!("cat {}; cat >/dev/null", frames_path.display()),
            ],
        );
        let result = run_server_smoke(&server, temp.path()).unwrap();
        assert!(!result.ok);
        assert_eq!(result.tools, 0);
    }
}
