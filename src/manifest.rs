//! # Project Manifest (`botpack.toml`)
//!
//! This module defines the typed model for the workspace manifest and the
//! strict parser that produces it. The configuration surface is a closed,
//! exhaustively enumerated set: unrecognized keys anywhere in the file are
//! *parse* errors rather than silently ignored.
//!
//! ## Key Components
//!
//! - **`Manifest`**: the root model (workspace metadata, dependency table,
//!   sync policy, target output configuration, alias tables).
//! - **`DependencySpec`**: a tagged value describing where a dependency comes
//!   from: a semver range against the registry, a git repository, a local
//!   path, or a tarball URL.
//! - **Deterministic writer**: `add`/`remove` rewrite the manifest through
//!   [`Manifest::to_toml_string`], which emits sections and keys in a fixed
//!   order so repeated edits never reorder the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Manifest schema version understood by this build.
pub const MANIFEST_VERSION: i64 = 1;

/// Workspace metadata: where local assets live and how they are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Assets directory, relative to the workspace root.
    pub dir: String,
    /// Optional asset-package name for the workspace itself.
    pub name: Option<String>,
    /// Private workspaces are never publishable.
    pub private: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: "assets".to_string(),
            name: None,
            private: true,
        }
    }
}

/// Where a dependency comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// Semver range resolved against the registry, e.g. `"^2.1"`.
    Registry(String),
    /// Git repository, optionally pinned to a rev.
    Git { git: String, rev: Option<String> },
    /// Local directory, relative to the manifest.
    Path { path: String },
    /// Tarball URL with required integrity.
    Url {
        url: String,
        integrity: Option<String>,
    },
}

impl DependencySpec {
    /// Short human-readable description for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            DependencySpec::Registry(spec) => spec.clone(),
            DependencySpec::Git { git, rev } => match rev {
                Some(rev) => format!("{git}#{rev}"),
                None => git.clone(),
            },
            DependencySpec::Path { path } => format!("path:{path}"),
            DependencySpec::Url { url, .. } => url.clone(),
        }
    }

    /// JSON rendering used for the lockfile's verbatim direct-dependency
    /// table: a bare string for registry specs, an object otherwise.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            DependencySpec::Registry(spec) => json!(spec),
            DependencySpec::Git { git, rev } => match rev {
                Some(rev) => json!({"git": git, "rev": rev}),
                None => json!({"git": git}),
            },
            DependencySpec::Path { path } => json!({"path": path}),
            DependencySpec::Url { url, integrity } => match integrity {
                Some(i) => json!({"url": url, "integrity": i}),
                None => json!({"url": url}),
            },
        }
    }
}

/// Link strategy for the virtual store and linked sync outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Symlink, falling back to hardlink, falling back to copy.
    #[default]
    Auto,
    Symlink,
    Hardlink,
    Copy,
}

impl LinkMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(LinkMode::Auto),
            "symlink" => Some(LinkMode::Symlink),
            "hardlink" => Some(LinkMode::Hardlink),
            "copy" => Some(LinkMode::Copy),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkMode::Auto => "auto",
            LinkMode::Symlink => "symlink",
            LinkMode::Hardlink => "hardlink",
            LinkMode::Copy => "copy",
        }
    }
}

/// Sync policy knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Run sync automatically after `add`/`remove`.
    pub on_add: bool,
    /// Run sync automatically after `install`/`update`.
    pub on_install: bool,
    /// Emit `.botpack/catalog.json` after sync.
    pub catalog: bool,
    pub link_mode: LinkMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_add: true,
            on_install: true,
            catalog: true,
            link_mode: LinkMode::Auto,
        }
    }
}

/// How a target handles policy fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Fragments,
    Generate,
    Off,
}

impl PolicyMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fragments" => Some(PolicyMode::Fragments),
            "generate" => Some(PolicyMode::Generate),
            "off" => Some(PolicyMode::Off),
            _ => None,
        }
    }
}

/// Per-target output configuration overriding or extending the built-ins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetConfig {
    pub root: Option<String>,
    pub skills_dir: Option<String>,
    pub commands_dir: Option<String>,
    pub agents_dir: Option<String>,
    pub mcp_out: Option<String>,
    pub policy_mode: Option<PolicyMode>,
    pub skills_fallback_root: Option<String>,
    pub skills_fallback_dir: Option<String>,
}

/// Alias tables rewriting final output names per asset type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasConfig {
    pub skills: BTreeMap<String, String>,
    pub commands: BTreeMap<String, String>,
    pub agents: BTreeMap<String, String>,
}

/// The fully-parsed project manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub workspace: WorkspaceConfig,
    pub dependencies: BTreeMap<String, DependencySpec>,
    pub sync: SyncConfig,
    pub targets: BTreeMap<String, TargetConfig>,
    pub aliases: AliasConfig,
}

impl Manifest {
    /// Load and validate `botpack.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::ConfigInvalid {
            path: path.to_path_buf(),
            message: format!("unable to read file: {e}"),
        })?;
        Self::parse(path, &text)
    }

    /// Parse and validate manifest text. `path` is only used in errors.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let data = load_toml(path, text)?;
        parse_manifest(path, &data)
    }

    /// Write the manifest back atomically with deterministic formatting.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_toml_string();
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Deterministic TOML rendering: fixed section order, sorted keys.
    pub fn to_toml_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("version = {MANIFEST_VERSION}\n"));

        out.push_str("\n[workspace]\n");
        out.push_str(&format!("dir = {}\n", toml_str(&self.workspace.dir)));
        if let Some(name) = &self.workspace.name {
            out.push_str(&format!("name = {}\n", toml_str(name)));
        }
        out.push_str(&format!("private = {}\n", self.workspace.private));

        if !self.dependencies.is_empty() {
            out.push_str("\n[dependencies]\n");
            for (name, spec) in &self.dependencies {
                out.push_str(&format!("{} = {}\n", toml_key(name), dep_value(spec)));
            }
        }

        out.push_str("\n[sync]\n");
        out.push_str(&format!("onAdd = {}\n", self.sync.on_add));
        out.push_str(&format!("onInstall = {}\n", self.sync.on_install));
        out.push_str(&format!("catalog = {}\n", self.sync.catalog));
        out.push_str(&format!(
            "linkMode = {}\n",
            toml_str(self.sync.link_mode.as_str())
        ));

        for (name, target) in &self.targets {
            out.push_str(&format!("\n[targets.{}]\n", toml_key(name)));
            let fields: [(&str, &Option<String>); 7] = [
                ("root", &target.root),
                ("skillsDir", &target.skills_dir),
                ("commandsDir", &target.commands_dir),
                ("agentsDir", &target.agents_dir),
                ("mcpOut", &target.mcp_out),
                ("skillsFallbackRoot", &target.skills_fallback_root),
                ("skillsFallbackDir", &target.skills_fallback_dir),
            ];
            for (key, value) in fields {
                if let Some(v) = value {
                    out.push_str(&format!("{key} = {}\n", toml_str(v)));
                }
            }
            if let Some(mode) = target.policy_mode {
                let s = match mode {
                    PolicyMode::Fragments => "fragments",
                    PolicyMode::Generate => "generate",
                    PolicyMode::Off => "off",
                };
                out.push_str(&format!("policyMode = {}\n", toml_str(s)));
            }
        }

        for (section, table) in [
            ("skills", &self.aliases.skills),
            ("commands", &self.aliases.commands),
            ("agents", &self.aliases.agents),
        ] {
            if !table.is_empty() {
                out.push_str(&format!("\n[aliases.{section}]\n"));
                for (from, to) in table {
                    out.push_str(&format!("{} = {}\n", toml_key(from), toml_str(to)));
                }
            }
        }

        out
    }

    /// Starter manifest written by `botpack init`.
    pub fn starter(name: Option<&str>) -> Self {
        Self {
            workspace: WorkspaceConfig {
                dir: "assets".to_string(),
                name: name.map(|n| n.to_string()),
                private: true,
            },
            ..Self::default()
        }
    }
}

// ---- strict TOML validation helpers ----

fn load_toml(path: &Path, text: &str) -> Result<toml::Table> {
    let value: toml::Value = text.parse().map_err(|e: toml::de::Error| Error::TomlParse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;
    match value {
        toml::Value::Table(t) => Ok(t),
        _ => Err(Error::ConfigInvalid {
            path: path.to_path_buf(),
            message: "top-level TOML must be a table".to_string(),
        }),
    }
}

fn invalid(path: &Path, message: impl Into<String>) -> Error {
    Error::ConfigInvalid {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn unknown_keys_message(where_: &str, unknown: Vec<&String>) -> String {
    let mut keys: Vec<&str> = unknown.into_iter().map(|s| s.as_str()).collect();
    keys.sort_unstable();
    format!("{where_}: unknown keys: {}", keys.join(", "))
}

fn check_keys(path: &Path, table: &toml::Table, where_: &str, allowed: &[&str]) -> Result<()> {
    let unknown: Vec<&String> = table
        .keys()
        .filter(|k| !allowed.contains(&k.as_str()))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(invalid(path, unknown_keys_message(where_, unknown)))
    }
}

fn require_table<'a>(path: &Path, value: &'a toml::Value, where_: &str) -> Result<&'a toml::Table> {
    value
        .as_table()
        .ok_or_else(|| invalid(path, format!("{where_}: expected table")))
}

fn require_str(path: &Path, value: &toml::Value, where_: &str) -> Result<String> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| invalid(path, format!("{where_}: expected string")))
}

fn require_bool(path: &Path, value: &toml::Value, where_: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| invalid(path, format!("{where_}: expected bool")))
}

fn require_int(path: &Path, value: &toml::Value, where_: &str) -> Result<i64> {
    value
        .as_integer()
        .ok_or_else(|| invalid(path, format!("{where_}: expected integer")))
}

fn optional_str(path: &Path, table: &toml::Table, key: &str, where_: &str) -> Result<Option<String>> {
    match table.get(key) {
        None => Ok(None),
        Some(v) => Ok(Some(require_str(path, v, &format!("{where_}.{key}"))?)),
    }
}

fn parse_manifest(path: &Path, data: &toml::Table) -> Result<Manifest> {
    check_keys(
        path,
        data,
        "manifest",
        &["version", "workspace", "dependencies", "sync", "targets", "aliases"],
    )?;

    let version = match data.get("version") {
        Some(v) => require_int(path, v, "version")?,
        None => return Err(invalid(path, "version: required")),
    };
    if version != MANIFEST_VERSION {
        return Err(invalid(
            path,
            format!("version: expected {MANIFEST_VERSION}, got {version}"),
        ));
    }

    let mut workspace = WorkspaceConfig::default();
    if let Some(raw) = data.get("workspace") {
        let tbl = require_table(path, raw, "workspace")?;
        check_keys(path, tbl, "workspace", &["dir", "name", "private"])?;
        if let Some(v) = tbl.get("dir") {
            workspace.dir = require_str(path, v, "workspace.dir")?;
        }
        workspace.name = optional_str(path, tbl, "name", "workspace")?;
        if let Some(v) = tbl.get("private") {
            workspace.private = require_bool(path, v, "workspace.private")?;
        }
    }

    let mut dependencies = BTreeMap::new();
    if let Some(raw) = data.get("dependencies") {
        let tbl = require_table(path, raw, "dependencies")?;
        for (name, spec) in tbl {
            dependencies.insert(name.clone(), parse_dependency(path, name, spec)?);
        }
    }

    let mut sync = SyncConfig::default();
    if let Some(raw) = data.get("sync") {
        let tbl = require_table(path, raw, "sync")?;
        check_keys(path, tbl, "sync", &["onAdd", "onInstall", "catalog", "linkMode"])?;
        if let Some(v) = tbl.get("onAdd") {
            sync.on_add = require_bool(path, v, "sync.onAdd")?;
        }
        if let Some(v) = tbl.get("onInstall") {
            sync.on_install = require_bool(path, v, "sync.onInstall")?;
        }
        if let Some(v) = tbl.get("catalog") {
            sync.catalog = require_bool(path, v, "sync.catalog")?;
        }
        if let Some(v) = tbl.get("linkMode") {
            let raw = require_str(path, v, "sync.linkMode")?;
            sync.link_mode = LinkMode::parse(&raw).ok_or_else(|| {
                invalid(
                    path,
                    format!("sync.linkMode: expected auto|symlink|hardlink|copy, got {raw:?}"),
                )
            })?;
        }
    }

    let mut targets = BTreeMap::new();
    if let Some(raw) = data.get("targets") {
        let tbl = require_table(path, raw, "targets")?;
        for (name, target_raw) in tbl {
            let target_tbl = require_table(path, target_raw, &format!("targets.{name}"))?;
            targets.insert(name.clone(), parse_target(path, name, target_tbl)?);
        }
    }

    let mut aliases = AliasConfig::default();
    if let Some(raw) = data.get("aliases") {
        let tbl = require_table(path, raw, "aliases")?;
        check_keys(path, tbl, "aliases", &["skills", "commands", "agents"])?;
        for (key, dst) in [
            ("skills", &mut aliases.skills),
            ("commands", &mut aliases.commands),
            ("agents", &mut aliases.agents),
        ] {
            if let Some(sub) = tbl.get(key) {
                let sub_tbl = require_table(path, sub, &format!("aliases.{key}"))?;
                for (from, to) in sub_tbl {
                    dst.insert(
                        from.clone(),
                        require_str(path, to, &format!("aliases.{key}.{from}"))?,
                    );
                }
            }
        }
    }

    Ok(Manifest {
        workspace,
        dependencies,
        sync,
        targets,
        aliases,
    })
}

fn parse_dependency(path: &Path, name: &str, spec: &toml::Value) -> Result<DependencySpec> {
    let where_ = format!("dependencies.{name}");
    if let Some(s) = spec.as_str() {
        return Ok(DependencySpec::Registry(s.to_string()));
    }
    let tbl = spec
        .as_table()
        .ok_or_else(|| invalid(path, format!("{where_}: expected string or table")))?;

    if tbl.contains_key("git") {
        check_keys(path, tbl, &where_, &["git", "rev"])?;
        return Ok(DependencySpec::Git {
            git: require_str(path, &tbl["git"], &format!("{where_}.git"))?,
            rev: optional_str(path, tbl, "rev", &where_)?,
        });
    }
    if tbl.contains_key("path") {
        check_keys(path, tbl, &where_, &["path"])?;
        return Ok(DependencySpec::Path {
            path: require_str(path, &tbl["path"], &format!("{where_}.path"))?,
        });
    }
    if tbl.contains_key("url") {
        check_keys(path, tbl, &where_, &["url", "integrity"])?;
        return Ok(DependencySpec::Url {
            url: require_str(path, &tbl["url"], &format!("{where_}.url"))?,
            integrity: optional_str(path, tbl, "integrity", &where_)?,
        });
    }
    Err(invalid(
        path,
        format!("{where_}: expected a semver string or one of {{git=...}}, {{path=...}}, {{url=...}}"),
    ))
}

fn parse_target(path: &Path, name: &str, tbl: &toml::Table) -> Result<TargetConfig> {
    let where_ = format!("targets.{name}");
    check_keys(
        path,
        tbl,
        &where_,
        &[
            "root",
            "skillsDir",
            "commandsDir",
            "agentsDir",
            "mcpOut",
            "policyMode",
            "skillsFallbackRoot",
            "skillsFallbackDir",
        ],
    )?;
    let policy_mode = match optional_str(path, tbl, "policyMode", &where_)? {
        None => None,
        Some(raw) => Some(PolicyMode::parse(&raw).ok_or_else(|| {
            invalid(
                path,
                format!("{where_}.policyMode: expected fragments|generate|off, got {raw:?}"),
            )
        })?),
    };
    Ok(TargetConfig {
        root: optional_str(path, tbl, "root", &where_)?,
        skills_dir: optional_str(path, tbl, "skillsDir", &where_)?,
        commands_dir: optional_str(path, tbl, "commandsDir", &where_)?,
        agents_dir: optional_str(path, tbl, "agentsDir", &where_)?,
        mcp_out: optional_str(path, tbl, "mcpOut", &where_)?,
        policy_mode,
        skills_fallback_root: optional_str(path, tbl, "skillsFallbackRoot", &where_)?,
        skills_fallback_dir: optional_str(path, tbl, "skillsFallbackDir", &where_)?,
    })
}

// ---- deterministic TOML writing ----

fn toml_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        toml_str(key)
    }
}

fn toml_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn dep_value(spec: &DependencySpec) -> String {
    match spec {
        DependencySpec::Registry(s) => toml_str(s),
        DependencySpec::Git { git, rev } => match rev {
            Some(rev) => format!("{{ git = {}, rev = {} }}", toml_str(git), toml_str(rev)),
            None => format!("{{ git = {} }}", toml_str(git)),
        },
        DependencySpec::Path { path } => format!("{{ path = {} }}", toml_str(path)),
        DependencySpec::Url { url, integrity } => match integrity {
            Some(i) => format!("{{ url = {}, integrity = {} }}", toml_str(url), toml_str(i)),
            None => format!("{{ url = {} }}", toml_str(url)),
        },
    }
}
