//! # Asset Catalog
//!
//! `.botpack/catalog.json` is a metadata-only index of everything the
//! scanner found: workspace assets plus each installed package's assets.
//! No skill bodies are ever included.
//!
//! The document carries a `digest` over its deterministic portion; the
//! generation timestamp sits outside that hashed portion so two catalogs of
//! the same workspace state compare equal by digest.

use std::path::Path;

use serde_json::json;

use crate::assets::AssetIndex;
use crate::error::Result;
use crate::lockfile::canonical_json;
use crate::sync::state::checksum_bytes;
use crate::sync::PackageAssets;

/// Catalog schema version.
pub const CATALOG_VERSION: u32 = 1;

/// Build the canonical catalog document.
pub fn build(
    workspace_dir: &str,
    workspace_index: &AssetIndex,
    packages: &[PackageAssets],
    generated_at: Option<&str>,
) -> Result<serde_json::Value> {
    let mut doc = json!({
        "version": CATALOG_VERSION,
        "workspace": {"dir": workspace_dir},
        "workspaceAssets": index_json(workspace_index),
        "packages": packages
            .iter()
            .map(|p| {
                json!({
                    "key": p.key,
                    "name": p.name,
                    "integrity": p.integrity,
                    "assets": index_json(&p.index),
                })
            })
            .collect::<Vec<_>>(),
    });

    // Digest covers everything above; generatedAt is added afterwards so it
    // never participates in the hash.
    let digest = checksum_bytes(canonical_json(&doc)?.as_bytes());
    let obj = doc.as_object_mut().expect("catalog is an object");
    obj.insert("digest".to_string(), json!(digest));
    if let Some(ts) = generated_at {
        obj.insert("generatedAt".to_string(), json!(ts));
    }
    Ok(doc)
}

/// Write the catalog atomically.
pub fn write(path: &Path, catalog: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = canonical_json(catalog)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn index_json(index: &AssetIndex) -> serde_json::Value {
    json!({
        "skills": index
            .skills
            .iter()
            .map(|s| {
                let mut skill = json!({
                    "id": s.id,
                    "title": s.title,
                    "description": s.description,
                    "path": s.skill_md.to_string_lossy(),
                });
                if !s.scripts.is_empty() {
                    skill["scripts"] = s
                        .scripts
                        .iter()
                        .map(|script| {
                            let mut out = json!({
                                "path": script.path.to_string_lossy(),
                                "runtime": script.runtime,
                            });
                            if let Some(meta) = &script.pep723 {
                                out["pep723"] = json!({
                                    "requiresPython": meta.requires_python,
                                    "dependencies": meta.dependencies,
                                });
                            }
                            out
                        })
                        .collect();
                }
                skill
            })
            .collect::<Vec<_>>(),
        "commands": index
            .commands
            .iter()
            .map(|c| json!({"id": c.id, "path": c.path.to_string_lossy()}))
            .collect::<Vec<_>>(),
        "agents": index
            .agents
            .iter()
            .map(|a| json!({"id": a.id, "path": a.path.to_string_lossy()}))
            .collect::<Vec<_>>(),
        "mcpServers": index.mcp_servers.is_some(),
        "policies": index
            .policies
            .iter()
            .map(|p| json!({"id": p.id}))
            .collect::<Vec<_>>(),
        "templates": index
            .templates
            .iter()
            .map(|t| json!({"id": t.id}))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets;
    use std::fs;
    use tempfile::TempDir;

    fn sample_index() -> (TempDir, AssetIndex) {
        let dir = TempDir::new().unwrap();
        let skill = dir.path().join("skills/fetch_web");
        fs::create_dir_all(&skill).unwrap();
        fs::write(
            skill.join("SKILL.md"),
            "---\nname: Fetch Web\ndescription: d\n---\nbody",
        )
        .unwrap();
        let index = assets::scan(dir.path()).unwrap();
        (dir, index)
    }

    #[test]
    fn test_digest_excludes_timestamp() {
        let (_dir, index) = sample_index();
        let a = build("assets", &index, &[], Some("2024-01-01T00:00:00Z")).unwrap();
        let b = build("assets", &index, &[], Some("2030-12-31T23:59:59Z")).unwrap();
        assert_eq!(a["digest"], b["digest"]);
        assert_ne!(a["generatedAt"], b["generatedAt"]);
    }

    #[test]
    fn test_catalog_contains_no_bodies() {
        let (_dir, index) = sample_index();
        let doc = build("assets", &index, &[], None).unwrap();
        let text = canonical_json(&doc).unwrap();
        assert!(!text.contains("body"));
        assert!(text.contains("Fetch Web"));
    }

    #[test]
    fn test_catalog_lists_templates_and_policies() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("templates/rust")).unwrap();
        fs::write(dir.path().join("templates/rust/main.rs.tmpl"), "fn main() {}").unwrap();
        fs::create_dir_all(dir.path().join("policy")).unwrap();
        fs::write(dir.path().join("policy/net.toml"), "allow = []").unwrap();
        let index = assets::scan(dir.path()).unwrap();

        let doc = build("assets", &index, &[], None).unwrap();
        let assets = &doc["workspaceAssets"];
        assert_eq!(assets["templates"][0]["id"], "rust/main.rs.tmpl");
        assert_eq!(assets["policies"][0]["id"], "net.toml");
    }

    #[test]
    fn test_write_is_deterministic() {
        let (_dir, index) = sample_index();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.json");

        let doc = build("assets", &index, &[], None).unwrap();
        write(&path, &doc).unwrap();
        let first = fs::read_to_string(&path).unwrap();
        write(&path, &doc).unwrap();
        let second = fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with('\n'));
    }
}
