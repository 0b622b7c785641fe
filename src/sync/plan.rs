//! Sync planning.
//!
//! A plan is the full list of operations that project the asset index onto
//! one target's directory layout, plus the sync state those operations will
//! produce. Planning is pure: nothing is written until
//! [`super::apply::apply_plan`] runs the plan.
//!
//! Output naming is package-qualified: `<scope-name>.<id>` with the scope
//! slash replaced by a dash and the `@` dropped, so two versions of one
//! package (or two packages with the same skill id) never collide. Aliases
//! rewrite the final name (the reserved alias value `hide` drops the asset
//! from the target entirely); any remaining collision is a *sync* error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::assets::AssetIndex;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, PolicyMode, TargetConfig};
use crate::mcp::{self, McpServer};
use crate::sync::state::{checksum_bytes, checksum_path, PathState};
use crate::trust::{TrustConfig, TrustDecision, WORKSPACE_TRUST_KEY};

/// One planned operation. All destinations are relative to the workspace
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    CreateDir { dst: PathBuf },
    /// Link (or copy, per link mode) a source file or skill directory.
    Link { src: PathBuf, dst: PathBuf },
    /// Write generated bytes (MCP config, generated policy).
    WriteFile { dst: PathBuf, bytes: Vec<u8> },
    /// Remove a previously-materialized path (`--clean`).
    Remove { dst: PathBuf },
}

impl SyncOp {
    pub fn dst(&self) -> &Path {
        match self {
            SyncOp::CreateDir { dst }
            | SyncOp::Link { dst, .. }
            | SyncOp::WriteFile { dst, .. }
            | SyncOp::Remove { dst } => dst,
        }
    }
}

/// A target's effective output layout after manifest overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub name: String,
    pub root: String,
    pub skills_dir: Option<String>,
    pub commands_dir: Option<String>,
    pub agents_dir: Option<String>,
    pub mcp_out: Option<String>,
    pub policy_mode: PolicyMode,
    /// Where skills land when this target has no skills directory of its
    /// own (informational; the owning target materializes them).
    pub skills_fallback: Option<String>,
}

impl TargetSpec {
    /// Hash of the layout, stored in sync state so layout changes defeat
    /// the cheap no-op path.
    pub fn config_hash(&self) -> String {
        checksum_bytes(format!("{self:?}").as_bytes())
    }
}

/// Built-in targets.
pub fn builtin(name: &str) -> Option<TargetSpec> {
    match name {
        "claude" => Some(TargetSpec {
            name: "claude".to_string(),
            root: ".claude".to_string(),
            skills_dir: Some("skills".to_string()),
            commands_dir: Some("commands".to_string()),
            agents_dir: Some("agents".to_string()),
            mcp_out: Some("mcp.json".to_string()),
            policy_mode: PolicyMode::Off,
            skills_fallback: None,
        }),
        "amp" => Some(TargetSpec {
            name: "amp".to_string(),
            root: ".agents".to_string(),
            skills_dir: None,
            commands_dir: Some("commands".to_string()),
            agents_dir: Some("agents".to_string()),
            mcp_out: None,
            policy_mode: PolicyMode::Off,
            skills_fallback: Some(".claude/skills".to_string()),
        }),
        "droid" => Some(TargetSpec {
            name: "droid".to_string(),
            root: ".factory".to_string(),
            skills_dir: None,
            commands_dir: None,
            agents_dir: None,
            mcp_out: None,
            policy_mode: PolicyMode::Off,
            skills_fallback: Some(".claude/skills".to_string()),
        }),
        _ => None,
    }
}

/// Resolve a target name through the built-ins and manifest overrides.
pub fn resolve_target(name: &str, manifest: &Manifest) -> Result<TargetSpec> {
    let base = builtin(name);
    let config = manifest.targets.get(name);
    match (base, config) {
        (Some(spec), None) => Ok(spec),
        (base, Some(config)) => {
            let mut spec = base.unwrap_or_else(|| TargetSpec {
                name: name.to_string(),
                root: String::new(),
                skills_dir: None,
                commands_dir: None,
                agents_dir: None,
                mcp_out: None,
                policy_mode: PolicyMode::Off,
                skills_fallback: None,
            });
            apply_overrides(&mut spec, config);
            if spec.root.is_empty() {
                return Err(Error::ConfigInvalid {
                    path: PathBuf::from("botpack.toml"),
                    message: format!("targets.{name}: root is required for custom targets"),
                });
            }
            Ok(spec)
        }
        (None, None) => Err(Error::UnknownTarget {
            target: name.to_string(),
        }),
    }
}

fn apply_overrides(spec: &mut TargetSpec, config: &TargetConfig) {
    if let Some(root) = &config.root {
        spec.root = root.clone();
    }
    if let Some(dir) = &config.skills_dir {
        spec.skills_dir = Some(dir.clone());
    }
    if let Some(dir) = &config.commands_dir {
        spec.commands_dir = Some(dir.clone());
    }
    if let Some(dir) = &config.agents_dir {
        spec.agents_dir = Some(dir.clone());
    }
    if let Some(out) = &config.mcp_out {
        spec.mcp_out = Some(out.clone());
    }
    if let Some(mode) = config.policy_mode {
        spec.policy_mode = mode;
    }
    if let Some(root) = &config.skills_fallback_root {
        let dir = config.skills_fallback_dir.as_deref().unwrap_or("skills");
        spec.skills_fallback = Some(format!("{root}/{dir}"));
    }
}

/// The assets of one installed package, read from the virtual store.
#[derive(Debug, Clone)]
pub struct PackageAssets {
    /// `name@version`.
    pub key: String,
    pub name: String,
    /// File-safe output prefix, e.g. `acme-quality-skills`.
    pub prefix: String,
    pub integrity: String,
    pub index: AssetIndex,
}

/// File-safe prefix for package-qualified output names.
pub fn sanitize_prefix(name: &str) -> String {
    name.replace('/', "-").replace('@', "")
}

/// Everything planning needs.
pub struct PlanInput<'a> {
    pub target: TargetSpec,
    pub workspace_prefix: String,
    pub workspace_index: &'a AssetIndex,
    pub packages: &'a [PackageAssets],
    pub manifest: &'a Manifest,
    pub trust: &'a TrustConfig,
}

/// The computed plan for one target.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub target: TargetSpec,
    pub ops: Vec<SyncOp>,
    /// State the plan produces, keyed by workspace-relative path.
    pub next_paths: BTreeMap<String, PathState>,
    /// Gated servers that a recorded decision denies (reported, omitted).
    pub blocked: Vec<String>,
    /// `(package key, reason)` for capability-bearing servers with no
    /// recorded decision; materialization must not proceed past these.
    pub undecided: Vec<(String, String)>,
}

impl SyncPlan {
    pub fn config_hash(&self) -> String {
        self.target.config_hash()
    }
}

/// Build the plan for one target.
pub fn build_plan(input: &PlanInput<'_>) -> Result<SyncPlan> {
    let root = PathBuf::from(&input.target.root);
    let mut ops: Vec<SyncOp> = Vec::new();
    let mut next_paths = BTreeMap::new();
    // final dst -> (source address, was_aliased)
    let mut claimed: BTreeMap<PathBuf, (String, bool)> = BTreeMap::new();

    let mut claim = |dst: PathBuf, source: String, aliased: bool| -> Result<()> {
        if let Some((first, first_aliased)) = claimed.get(&dst) {
            if aliased || *first_aliased {
                return Err(Error::AliasCollision {
                    alias: dst.to_string_lossy().to_string(),
                });
            }
            return Err(Error::OutputCollision {
                path: dst.to_string_lossy().to_string(),
                first: first.clone(),
                second: source,
            });
        }
        claimed.insert(dst, (source, aliased));
        Ok(())
    };

    // Owner iteration order: workspace first, then packages by key. The
    // final op list is ordered by destination for determinism.
    let owners: Vec<(String, String, &AssetIndex)> = std::iter::once((
        "workspace".to_string(),
        input.workspace_prefix.clone(),
        input.workspace_index,
    ))
    .chain(input.packages.iter().map(|p| {
        (p.key.clone(), p.prefix.clone(), &p.index)
    }))
    .collect();

    if let Some(skills_dir) = &input.target.skills_dir {
        let out_dir = root.join(skills_dir);
        ops.push(SyncOp::CreateDir {
            dst: out_dir.clone(),
        });
        for (owner, prefix, index) in &owners {
            for skill in &index.skills {
                let default_name = format!("{prefix}.{}", skill.id);
                let (final_name, aliased) =
                    apply_alias(&input.manifest.aliases.skills, &default_name);
                if final_name == "hide" {
                    continue;
                }
                let dst = out_dir.join(&final_name);
                let source = format!("{owner}:{}", skill.id);
                claim(dst.clone(), source.clone(), aliased)?;
                let checksum = checksum_path(&skill.skill_md).ok_or_else(|| Error::SyncApply {
                    target: input.target.name.clone(),
                    message: format!("unreadable skill source {}", skill.skill_md.display()),
                })?;
                ops.push(SyncOp::Link {
                    src: skill.dir.clone(),
                    dst: dst.clone(),
                });
                next_paths.insert(
                    path_key(&dst),
                    PathState {
                        source,
                        checksum,
                        link: Some(skill.dir.to_string_lossy().to_string()),
                    },
                );
            }
        }
    }

    fn commands_of(index: &AssetIndex) -> Vec<crate::assets::FileAsset> {
        index.commands.clone()
    }
    fn agents_of(index: &AssetIndex) -> Vec<crate::assets::FileAsset> {
        index.agents.clone()
    }
    type AssetsOf = fn(&AssetIndex) -> Vec<crate::assets::FileAsset>;
    let file_sections: [(&Option<String>, AssetsOf, &BTreeMap<String, String>); 2] = [
        (
            &input.target.commands_dir,
            commands_of,
            &input.manifest.aliases.commands,
        ),
        (
            &input.target.agents_dir,
            agents_of,
            &input.manifest.aliases.agents,
        ),
    ];
    for (dir_config, assets_of, kind_aliases) in file_sections {
        let Some(dir) = dir_config else {
            continue;
        };
        let out_dir = root.join(dir);
        ops.push(SyncOp::CreateDir {
            dst: out_dir.clone(),
        });
        for (owner, prefix, index) in &owners {
            for asset in assets_of(index) {
                let default_name = format!("{prefix}.{}", asset.id);
                let (final_name, aliased) = apply_alias(kind_aliases, &default_name);
                if final_name == "hide" {
                    continue;
                }
                let dst = out_dir.join(format!("{final_name}.md"));
                let source = format!("{owner}:{}", asset.id);
                claim(dst.clone(), source.clone(), aliased)?;
                let checksum = checksum_path(&asset.path).ok_or_else(|| Error::SyncApply {
                    target: input.target.name.clone(),
                    message: format!("unreadable source {}", asset.path.display()),
                })?;
                ops.push(SyncOp::Link {
                    src: asset.path.clone(),
                    dst: dst.clone(),
                });
                next_paths.insert(
                    path_key(&dst),
                    PathState {
                        source,
                        checksum,
                        link: Some(asset.path.to_string_lossy().to_string()),
                    },
                );
            }
        }
    }

    let mut blocked = Vec::new();
    let mut undecided = Vec::new();

    if let Some(mcp_out) = &input.target.mcp_out {
        let mut allowed: Vec<McpServer> = Vec::new();
        let mut any_input = false;

        // Workspace servers are gated under a reserved key; they can spawn
        // processes just like package servers.
        if let Some(servers_path) = &input.workspace_index.mcp_servers {
            any_input = true;
            let servers = mcp::parse_servers(&input.workspace_prefix, servers_path)?;
            gate_servers(
                WORKSPACE_TRUST_KEY,
                None,
                servers,
                input.trust,
                &mut allowed,
                &mut blocked,
                &mut undecided,
            );
        }

        for pkg in input.packages {
            let Some(servers_path) = &pkg.index.mcp_servers else {
                continue;
            };
            any_input = true;
            let servers = mcp::parse_servers(&pkg.name, servers_path)?;
            gate_servers(
                &pkg.key,
                Some(&pkg.integrity),
                servers,
                input.trust,
                &mut allowed,
                &mut blocked,
                &mut undecided,
            );
        }

        if any_input {
            allowed.sort_by(|a, b| a.fqid.cmp(&b.fqid));
            mcp::check_collisions(&allowed)?;
            let bytes = mcp::render_mcp_json(&allowed)?.into_bytes();
            let dst = root.join(mcp_out);
            claim(dst.clone(), "generated:mcp".to_string(), false)?;
            next_paths.insert(
                path_key(&dst),
                PathState {
                    source: "generated:mcp".to_string(),
                    checksum: checksum_bytes(&bytes),
                    link: None,
                },
            );
            ops.push(SyncOp::WriteFile { dst, bytes });
        }
    }

    match input.target.policy_mode {
        PolicyMode::Off => {}
        PolicyMode::Fragments => {
            let out_dir = root.join("policy");
            let mut any = false;
            for (owner, prefix, index) in &owners {
                for fragment in &index.policies {
                    if !any {
                        ops.push(SyncOp::CreateDir {
                            dst: out_dir.clone(),
                        });
                        any = true;
                    }
                    let file_name = format!(
                        "{prefix}.{}",
                        fragment.id.replace('/', "-")
                    );
                    let dst = out_dir.join(&file_name);
                    let source = format!("{owner}:{}", fragment.id);
                    claim(dst.clone(), source.clone(), false)?;
                    let checksum =
                        checksum_path(&fragment.path).ok_or_else(|| Error::SyncApply {
                            target: input.target.name.clone(),
                            message: format!("unreadable source {}", fragment.path.display()),
                        })?;
                    ops.push(SyncOp::Link {
                        src: fragment.path.clone(),
                        dst: dst.clone(),
                    });
                    next_paths.insert(
                        path_key(&dst),
                        PathState {
                            source,
                            checksum,
                            link: Some(fragment.path.to_string_lossy().to_string()),
                        },
                    );
                }
            }
        }
        PolicyMode::Generate => {
            let mut merged = String::new();
            for (owner, _prefix, index) in &owners {
                for fragment in &index.policies {
                    let body = std::fs::read_to_string(&fragment.path)?;
                    merged.push_str(&format!("# source: {owner}:{}\n", fragment.id));
                    merged.push_str(&body);
                    if !body.ends_with('\n') {
                        merged.push('\n');
                    }
                }
            }
            if !merged.is_empty() {
                let dst = root.join("policy.md");
                claim(dst.clone(), "generated:policy".to_string(), false)?;
                let bytes = merged.into_bytes();
                next_paths.insert(
                    path_key(&dst),
                    PathState {
                        source: "generated:policy".to_string(),
                        checksum: checksum_bytes(&bytes),
                        link: None,
                    },
                );
                ops.push(SyncOp::WriteFile { dst, bytes });
            }
        }
    }

    // Deterministic op order: directories first, then by destination.
    ops.sort_by(|a, b| {
        let rank = |op: &SyncOp| match op {
            SyncOp::CreateDir { .. } => 0u8,
            SyncOp::Link { .. } | SyncOp::WriteFile { .. } => 1,
            SyncOp::Remove { .. } => 2,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.dst().cmp(b.dst()))
    });
    ops.dedup();

    Ok(SyncPlan {
        target: input.target.clone(),
        ops,
        next_paths,
        blocked,
        undecided,
    })
}

#[allow(clippy::too_many_arguments)]
fn gate_servers(
    trust_key: &str,
    integrity: Option<&str>,
    servers: Vec<McpServer>,
    trust: &TrustConfig,
    allowed: &mut Vec<McpServer>,
    blocked: &mut Vec<String>,
    undecided: &mut Vec<(String, String)>,
) {
    for server in servers {
        let decision = trust.check_server(
            trust_key,
            integrity,
            &server.fqid,
            server.needs_exec(),
            server.needs_mcp(),
        );
        match decision {
            TrustDecision::Allow => allowed.push(server),
            TrustDecision::Deny(reason) => blocked.push(reason),
            TrustDecision::Undecided(reason) => {
                undecided.push((trust_key.to_string(), reason));
            }
        }
    }
}

fn apply_alias(aliases: &BTreeMap<String, String>, default_name: &str) -> (String, bool) {
    match aliases.get(default_name) {
        Some(alias) => (alias.clone(), true),
        None => (default_name.to_string(), false),
    }
}

fn path_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
