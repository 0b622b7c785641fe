//! # Asset Scanner
//!
//! Discovers and classifies assets in the workspace assets directory and in
//! every installed package, by conventional path:
//!
//! - `skills/<id>/SKILL.md` (with optional `skills/<id>/scripts/*.py`)
//! - `commands/<id>.md`
//! - `agents/<id>.md`
//! - `mcp/servers.toml`
//! - `policy/*`
//! - `templates/*`
//!
//! Only YAML frontmatter and PEP 723 header blocks are parsed; skill bodies
//! are never read into the model. Scanning is deterministic: every listing
//! is sorted, and [`AssetIndex::all`] yields assets ordered by type, then
//! owner, then id.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::pep723::{parse_script, ScriptMetadata};

/// Asset categories botpack understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    Skill,
    Command,
    Agent,
    McpServer,
    PolicyFragment,
    Template,
}

/// A skill script with optional PEP 723 metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptAsset {
    pub path: PathBuf,
    pub runtime: String,
    pub pep723: Option<ScriptMetadata>,
}

/// A skill: a directory holding `SKILL.md` plus optional scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillAsset {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Path of the skill directory.
    pub dir: PathBuf,
    /// Path of `SKILL.md` inside it.
    pub skill_md: PathBuf,
    pub scripts: Vec<ScriptAsset>,
}

/// A single-file Markdown asset (command or agent definition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAsset {
    pub id: String,
    pub path: PathBuf,
}

/// Everything found under one root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetIndex {
    pub skills: Vec<SkillAsset>,
    pub commands: Vec<FileAsset>,
    pub agents: Vec<FileAsset>,
    /// `mcp/servers.toml` when present; parsed later by the MCP merger.
    pub mcp_servers: Option<PathBuf>,
    pub policies: Vec<FileAsset>,
    pub templates: Vec<FileAsset>,
}

/// A tagged view over an index entry, used for the catalog and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef<'a> {
    pub kind: AssetKind,
    pub id: &'a str,
    pub path: &'a Path,
}

impl AssetIndex {
    /// All assets in canonical order (type, then id). Ordering across
    /// owners is the caller's job since one index covers one root.
    pub fn all(&self) -> Vec<AssetRef<'_>> {
        let mut out = Vec::new();
        for s in &self.skills {
            out.push(AssetRef {
                kind: AssetKind::Skill,
                id: &s.id,
                path: &s.skill_md,
            });
        }
        for c in &self.commands {
            out.push(AssetRef {
                kind: AssetKind::Command,
                id: &c.id,
                path: &c.path,
            });
        }
        for a in &self.agents {
            out.push(AssetRef {
                kind: AssetKind::Agent,
                id: &a.id,
                path: &a.path,
            });
        }
        for p in &self.policies {
            out.push(AssetRef {
                kind: AssetKind::PolicyFragment,
                id: &p.id,
                path: &p.path,
            });
        }
        for t in &self.templates {
            out.push(AssetRef {
                kind: AssetKind::Template,
                id: &t.id,
                path: &t.path,
            });
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
            && self.commands.is_empty()
            && self.agents.is_empty()
            && self.mcp_servers.is_none()
            && self.policies.is_empty()
            && self.templates.is_empty()
    }
}

/// Scan one root (the workspace assets dir or a package payload).
pub fn scan(root: &Path) -> Result<AssetIndex> {
    let mut index = AssetIndex::default();

    let skills_dir = root.join("skills");
    if skills_dir.is_dir() {
        for dir in sorted_dirs(&skills_dir)? {
            let skill_md = dir.join("SKILL.md");
            if !skill_md.is_file() {
                continue;
            }
            index.skills.push(scan_skill(&dir, &skill_md)?);
        }
    }

    index.commands = scan_md_files(&root.join("commands"))?;
    index.agents = scan_md_files(&root.join("agents"))?;

    let servers = root.join("mcp").join("servers.toml");
    if servers.is_file() {
        index.mcp_servers = Some(servers);
    }

    index.policies = scan_flat_files(&root.join("policy"))?;
    index.templates = scan_flat_files(&root.join("templates"))?;

    Ok(index)
}

fn scan_skill(dir: &Path, skill_md: &Path) -> Result<SkillAsset> {
    let default_id = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let text = fs::read_to_string(skill_md)?;
    let fm = parse_frontmatter(skill_md, &text)?;
    let id = fm
        .get("id")
        .cloned()
        .filter(|s| !s.is_empty())
        .unwrap_or(default_id);
    let title = fm.get("name").cloned().filter(|s| !s.is_empty()).unwrap_or_else(|| id.clone());
    let description = fm.get("description").cloned().unwrap_or_default();

    let mut scripts = Vec::new();
    let scripts_dir = dir.join("scripts");
    if scripts_dir.is_dir() {
        for entry in walkdir::WalkDir::new(&scripts_dir)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Generic(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            let source = fs::read_to_string(entry.path())?;
            let pep723 = parse_script(entry.path(), &source)?;
            scripts.push(ScriptAsset {
                path: entry.path().to_path_buf(),
                runtime: "python".to_string(),
                pep723,
            });
        }
    }

    Ok(SkillAsset {
        id,
        title,
        description,
        dir: dir.to_path_buf(),
        skill_md: skill_md.to_path_buf(),
        scripts,
    })
}

/// Parse YAML frontmatter delimited by `---` lines into a flat string map.
/// Scalar values are stringified; nested values are kept as YAML snippets.
/// Malformed YAML is a *parse* error.
fn parse_frontmatter(
    path: &Path,
    text: &str,
) -> Result<std::collections::BTreeMap<String, String>> {
    let mut out = std::collections::BTreeMap::new();
    let Some(rest) = text.strip_prefix("---") else {
        return Ok(out);
    };
    let Some(end) = rest.find("\n---") else {
        return Err(Error::Frontmatter {
            path: path.to_path_buf(),
            message: "frontmatter opened with --- but never closed".to_string(),
        });
    };
    let block = &rest[..end];

    let value: serde_yaml::Value =
        serde_yaml::from_str(block).map_err(|e| Error::Frontmatter {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    match value {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                let val = match v {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Null => String::new(),
                    other => serde_yaml::to_string(&other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                out.insert(key, val);
            }
        }
        _ => {
            return Err(Error::Frontmatter {
                path: path.to_path_buf(),
                message: "frontmatter must be a mapping".to_string(),
            });
        }
    }
    Ok(out)
}

fn sorted_dirs(parent: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn scan_md_files(dir: &Path) -> Result<Vec<FileAsset>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !name.ends_with(".md") {
            continue;
        }
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    for path in paths {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        out.push(FileAsset { id, path });
    }
    Ok(out)
}

fn scan_flat_files(dir: &Path) -> Result<Vec<FileAsset>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Generic(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).expect("child of dir");
        out.push(FileAsset {
            id: rel.to_string_lossy().to_string(),
            path: entry.path().to_path_buf(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let root = TempDir::new().unwrap();
        let skills = root.path().join("skills/fetch_web");
        fs::create_dir_all(&skills).unwrap();
        fs::write(
            skills.join("SKILL.md"),
            "---\nname: Fetch Web\ndescription: Fetch pages\n---\n# body\n",
        )
        .unwrap();
        fs::create_dir_all(skills.join("scripts")).unwrap();
        fs::write(
            skills.join("scripts/run.py"),
            "# /// script\n# requires-python = \">=3.11\"\n# dependencies = [\"httpx\"]\n# ///\n",
        )
        .unwrap();

        fs::create_dir_all(root.path().join("commands")).unwrap();
        fs::write(root.path().join("commands/review.md"), "review").unwrap();
        fs::create_dir_all(root.path().join("agents")).unwrap();
        fs::write(root.path().join("agents/helper.md"), "helper").unwrap();
        fs::create_dir_all(root.path().join("mcp")).unwrap();
        fs::write(root.path().join("mcp/servers.toml"), "version = 1\n").unwrap();
        root
    }

    #[test]
    fn test_scan_discovers_all_kinds() {
        let root = fixture();
        let index = scan(root.path()).unwrap();
        assert_eq!(index.skills.len(), 1);
        assert_eq!(index.commands.len(), 1);
        assert_eq!(index.agents.len(), 1);
        assert!(index.mcp_servers.is_some());

        let skill = &index.skills[0];
        assert_eq!(skill.id, "fetch_web");
        assert_eq!(skill.title, "Fetch Web");
        assert_eq!(skill.description, "Fetch pages");
        assert_eq!(skill.scripts.len(), 1);
        let meta = skill.scripts[0].pep723.as_ref().unwrap();
        assert_eq!(meta.dependencies, vec!["httpx"]);
    }

    #[test]
    fn test_scan_empty_root() {
        let root = TempDir::new().unwrap();
        let index = scan(root.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_skill_id_defaults_to_dirname() {
        let root = TempDir::new().unwrap();
        let skills = root.path().join("skills/no_meta");
        fs::create_dir_all(&skills).unwrap();
        fs::write(skills.join("SKILL.md"), "no frontmatter here\n").unwrap();
        let index = scan(root.path()).unwrap();
        assert_eq!(index.skills[0].id, "no_meta");
        assert_eq!(index.skills[0].title, "no_meta");
    }

    #[test]
    fn test_malformed_frontmatter_is_parse_error() {
        let root = TempDir::new().unwrap();
        let skills = root.path().join("skills/bad");
        fs::create_dir_all(&skills).unwrap();
        fs::write(skills.join("SKILL.md"), "---\n{ not: [ valid\n---\n").unwrap();
        let err = scan(root.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_unterminated_frontmatter_is_parse_error() {
        let root = TempDir::new().unwrap();
        let skills = root.path().join("skills/bad");
        fs::create_dir_all(&skills).unwrap();
        fs::write(skills.join("SKILL.md"), "---\nname: x\n").unwrap();
        assert!(scan(root.path()).is_err());
    }

    #[test]
    fn test_ordering_is_stable() {
        let root = TempDir::new().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            let d = root.path().join("skills").join(name);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join("SKILL.md"), "x").unwrap();
        }
        let index = scan(root.path()).unwrap();
        let ids: Vec<&str> = index.skills.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_hidden_and_non_md_files_skipped() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("commands")).unwrap();
        fs::write(root.path().join("commands/.hidden.md"), "x").unwrap();
        fs::write(root.path().join("commands/readme.txt"), "x").unwrap();
        fs::write(root.path().join("commands/go.md"), "x").unwrap();
        let index = scan(root.path()).unwrap();
        assert_eq!(index.commands.len(), 1);
        assert_eq!(index.commands[0].id, "go");
    }

    #[test]
    fn test_policy_and_templates() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("policy")).unwrap();
        fs::write(root.path().join("policy/net.toml"), "x").unwrap();
        fs::create_dir_all(root.path().join("templates/rust")).unwrap();
        fs::write(root.path().join("templates/rust/main.rs.tmpl"), "x").unwrap();
        let index = scan(root.path()).unwrap();
        assert_eq!(index.policies[0].id, "net.toml");
        assert_eq!(index.templates[0].id, "rust/main.rs.tmpl");
    }
}
