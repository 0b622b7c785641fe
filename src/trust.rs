//! # Trust Records
//!
//! Capability-bearing assets are never materialized without an explicit,
//! recorded decision. Decisions live in `.botpack/trust.toml`, keyed by
//! `name@version`, with optional per-server overrides and an optional
//! digest pin:
//!
//! ```toml
//! version = 1
//!
//! ["@acme/mcp-pack@0.3.0"]
//! allowExec = true
//! allowMcp = true
//!
//! ["@acme/mcp-pack@0.3.0".digest]
//! integrity = "sha256:..."
//!
//! ["@acme/mcp-pack@0.3.0".mcp."@acme/mcp-pack/postgres"]
//! allowExec = false
//! ```
//!
//! Lookup precedence: per-fqid override, then the package-wide flags, then
//! deny. "No entry at all" is distinct from a recorded deny: the former
//! blocks materialization (*trust-blocked*), the latter just omits the
//! gated server.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Reserved trust key for the workspace's own `mcp/servers.toml`.
pub const WORKSPACE_TRUST_KEY: &str = "__workspace__";

/// Per-server override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerTrust {
    pub allow_exec: bool,
    pub allow_mcp: bool,
}

/// One package's recorded decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustEntry {
    pub allow_exec: bool,
    pub allow_mcp: bool,
    /// When set, trust only applies to this exact content digest.
    pub integrity: Option<String>,
    /// Per-fqid overrides.
    pub mcp: BTreeMap<String, ServerTrust>,
}

/// The whole trust file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustConfig {
    pub packages: BTreeMap<String, TrustEntry>,
}

/// Outcome of a trust check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Allow,
    /// A recorded decision denies the capability; the asset is omitted.
    Deny(String),
    /// No decision is recorded; materialization must block.
    Undecided(String),
}

impl TrustDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, TrustDecision::Allow)
    }
}

impl TrustConfig {
    /// Load `.botpack/trust.toml`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
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
            other => return Err(invalid(format!("unsupported trust version {other:?}"))),
        }

        let mut packages = BTreeMap::new();
        for (key, raw) in &value {
            if key == "version" {
                continue;
            }
            let tbl = raw
                .as_table()
                .ok_or_else(|| invalid(format!("{key}: expected table")))?;
            packages.insert(key.clone(), parse_entry(path, key, tbl)?);
        }
        Ok(Self { packages })
    }

    /// Write atomically with deterministic formatting.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::from("version = 1\n");
        for (key, entry) in &self.packages {
            out.push_str(&format!("\n[{}]\n", quote_key(key)));
            out.push_str(&format!("allowExec = {}\n", entry.allow_exec));
            out.push_str(&format!("allowMcp = {}\n", entry.allow_mcp));
            if let Some(integrity) = &entry.integrity {
                out.push_str(&format!("\n[{}.digest]\nintegrity = \"{}\"\n", quote_key(key), integrity));
            }
            for (fqid, server) in &entry.mcp {
                out.push_str(&format!(
                    "\n[{}.mcp.{}]\nallowExec = {}\nallowMcp = {}\n",
                    quote_key(key),
                    quote_key(fqid),
                    server.allow_exec,
                    server.allow_mcp
                ));
            }
        }
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, out)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Record an allow/deny decision for a package.
    pub fn record(
        &mut self,
        key: &str,
        allow_exec: Option<bool>,
        allow_mcp: Option<bool>,
        integrity: Option<String>,
    ) {
        let entry = self.packages.entry(key.to_string()).or_default();
        if let Some(v) = allow_exec {
            entry.allow_exec = v;
        }
        if let Some(v) = allow_mcp {
            entry.allow_mcp = v;
        }
        if integrity.is_some() {
            entry.integrity = integrity;
        }
    }

    /// Drop a package's entry entirely.
    pub fn revoke(&mut self, key: &str) -> bool {
        self.packages.remove(key).is_some()
    }

    /// Evaluate trust for a whole package (used by `audit` and install-time
    /// capability checks).
    pub fn check_package(
        &self,
        key: &str,
        integrity: Option<&str>,
        needs_exec: bool,
        needs_mcp: bool,
    ) -> TrustDecision {
        self.check(key, integrity, None, needs_exec, needs_mcp)
    }

    /// Evaluate trust for one MCP server of a package.
    pub fn check_server(
        &self,
        key: &str,
        integrity: Option<&str>,
        fqid: &str,
        needs_exec: bool,
        needs_mcp: bool,
    ) -> TrustDecision {
        self.check(key, integrity, Some(fqid), needs_exec, needs_mcp)
    }

    fn check(
        &self,
        key: &str,
        integrity: Option<&str>,
        fqid: Option<&str>,
        needs_exec: bool,
        needs_mcp: bool,
    ) -> TrustDecision {
        let Some(entry) = self.packages.get(key) else {
            if needs_exec || needs_mcp {
                return TrustDecision::Undecided(format!(
                    "{key}: requires trust for exec/mcp"
                ));
            }
            return TrustDecision::Allow;
        };

        if let (Some(actual), Some(pinned)) = (integrity, entry.integrity.as_deref()) {
            if actual != pinned {
                return TrustDecision::Deny(format!(
                    "{key}: trust digest mismatch (trusted {pinned}, installed {actual})"
                ));
            }
        }

        let (allow_exec, allow_mcp) = match fqid.and_then(|f| entry.mcp.get(f)) {
            Some(server) => (server.allow_exec, server.allow_mcp),
            None => (entry.allow_exec, entry.allow_mcp),
        };

        if needs_exec && !allow_exec {
            return TrustDecision::Deny(match fqid {
                Some(f) => format!("{key}: exec not trusted for {f}"),
                None => format!("{key}: exec not trusted"),
            });
        }
        if needs_mcp && !allow_mcp {
            return TrustDecision::Deny(match fqid {
                Some(f) => format!("{key}: mcp not trusted for {f}"),
                None => format!("{key}: mcp not trusted"),
            });
        }
        TrustDecision::Allow
    }
}

fn parse_entry(path: &Path, key: &str, tbl: &toml::Table) -> Result<TrustEntry> {
    let invalid = |message: String| Error::ConfigInvalid {
        path: path.to_path_buf(),
        message,
    };
    for k in tbl.keys() {
        if !["allowExec", "allowMcp", "digest", "mcp"].contains(&k.as_str()) {
            return Err(invalid(format!("{key}: unknown key: {k}")));
        }
    }

    let mut entry = TrustEntry::default();
    if let Some(v) = tbl.get("allowExec") {
        entry.allow_exec = v
            .as_bool()
            .ok_or_else(|| invalid(format!("{key}.allowExec: expected bool")))?;
    }
    if let Some(v) = tbl.get("allowMcp") {
        entry.allow_mcp = v
            .as_bool()
            .ok_or_else(|| invalid(format!("{key}.allowMcp: expected bool")))?;
    }
    if let Some(v) = tbl.get("digest") {
        let digest_tbl = v
            .as_table()
            .ok_or_else(|| invalid(format!("{key}.digest: expected table")))?;
        for k in digest_tbl.keys() {
            if k != "integrity" {
                return Err(invalid(format!("{key}.digest: unknown key: {k}")));
            }
        }
        entry.integrity = Some(
            digest_tbl
                .get("integrity")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid(format!("{key}.digest.integrity: expected string")))?
                .to_string(),
        );
    }
    if let Some(v) = tbl.get("mcp") {
        let mcp_tbl = v
            .as_table()
            .ok_or_else(|| invalid(format!("{key}.mcp: expected table")))?;
        for (fqid, raw) in mcp_tbl {
            let server_tbl = raw
                .as_table()
                .ok_or_else(|| invalid(format!("{key}.mcp.{fqid}: expected table")))?;
            for k in server_tbl.keys() {
                if !["allowExec", "allowMcp"].contains(&k.as_str()) {
                    return Err(invalid(format!("{key}.mcp.{fqid}: unknown key: {k}")));
                }
            }
            let mut server = ServerTrust::default();
            if let Some(b) = server_tbl.get("allowExec") {
                server.allow_exec = b
                    .as_bool()
                    .ok_or_else(|| invalid(format!("{key}.mcp.{fqid}.allowExec: expected bool")))?;
            }
            if let Some(b) = server_tbl.get("allowMcp") {
                server.allow_mcp = b
                    .as_bool()
                    .ok_or_else(|| invalid(format!("{key}.mcp.{fqid}.allowMcp: expected bool")))?;
            }
            entry.mcp.insert(fqid.clone(), server);
        }
    }
    Ok(entry)
}

fn quote_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        format!("\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
    }
}
