//! # Dependency Resolver
//!
//! Turns the manifest's direct-dependency table plus registry metadata into
//! a fully-pinned graph, closed under each package's own dependencies.
//!
//! Resolution walks depth-first from the direct dependencies, memoizing on
//! the request `(name, spec)` so a dependency shared by several parents is
//! fetched once. Distinct versions of one name coexist as separate
//! `name@version` nodes; a single `name@version` resolving to two different
//! content digests is an error.
//!
//! When a lockfile is present, pins that still satisfy their spec are reused
//! without touching the network, which is also what makes
//! `install --offline` work after a `prefetch`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, info};
use semver::{Version, VersionReq};
use serde_json::json;

use crate::error::{Error, Result};
use crate::fetch::{FetchedTree, Fetcher, ResolvedIdentity};
use crate::lockfile::{package_key, split_key, LockedPackage, Lockfile};
use crate::manifest::DependencySpec;
use crate::package::{Capabilities, PackageManifest};
use crate::registry::{pick_highest, RegistryClient, SourceRecord};
use crate::store::Store;

/// One fully-pinned package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    /// Tagged source record as serialized into the lockfile.
    pub source: serde_json::Value,
    /// Resolution details (commit, original ref).
    pub resolved: serde_json::Map<String, serde_json::Value>,
    /// Content digest; store key and lockfile integrity.
    pub integrity: String,
    pub capabilities: Capabilities,
    /// Edges into the graph: dependency name → pinned version.
    pub dependencies: BTreeMap<String, String>,
}

impl ResolvedPackage {
    pub fn key(&self) -> String {
        package_key(&self.name, &self.version)
    }
}

/// The pinned graph.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Direct-dependency table, verbatim from the manifest.
    pub direct: BTreeMap<String, serde_json::Value>,
    /// All packages, keyed `name@version`.
    pub packages: BTreeMap<String, ResolvedPackage>,
}

impl Resolution {
    pub fn to_lockfile(&self) -> Lockfile {
        let packages = self
            .packages
            .iter()
            .map(|(key, pkg)| {
                (
                    key.clone(),
                    LockedPackage {
                        source: pkg.source.clone(),
                        resolved: pkg.resolved.clone(),
                        integrity: pkg.integrity.clone(),
                        dependencies: pkg.dependencies.clone(),
                        capabilities: BTreeMap::from([
                            ("exec".to_string(), pkg.capabilities.exec),
                            ("mcp".to_string(), pkg.capabilities.mcp),
                            ("network".to_string(), pkg.capabilities.network),
                        ]),
                    },
                )
            })
            .collect();
        Lockfile::new(self.direct.clone(), packages)
    }
}

/// Options shared by `install`, `update`, and `prefetch`.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Never touch the network; missing prerequisites are fetch errors.
    pub offline: bool,
    /// Ignore lockfile pins for these names (empty = honor all pins).
    /// `update` with no arguments passes every direct dependency.
    pub refresh: Vec<String>,
}

/// Everything resolution needs, passed by value from the command boundary.
pub struct Resolver<'a> {
    pub workspace_root: &'a Path,
    pub fetcher: &'a Fetcher,
    pub store: &'a Store,
    pub registry: &'a RegistryClient,
    pub previous: Option<&'a Lockfile>,
    pub options: ResolveOptions,
}

/// Memoization key for one resolution request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    name: String,
    spec: String,
    base: PathBuf,
}

impl<'a> Resolver<'a> {
    /// Resolve the whole graph from the direct-dependency table.
    pub fn resolve(&self, direct: &BTreeMap<String, DependencySpec>) -> Result<Resolution> {
        let mut state = ResolveState::default();
        for (name, spec) in direct {
            self.resolve_request(name, spec, self.workspace_root, &mut state)?;
        }
        Ok(Resolution {
            direct: direct
                .iter()
                .map(|(name, spec)| (name.clone(), spec.to_json()))
                .collect(),
            packages: state.packages,
        })
    }

    /// Resolve one `(name, spec)` request, recursing into its dependencies.
    /// Returns the pinned `name@version` key.
    fn resolve_request(
        &self,
        name: &str,
        spec: &DependencySpec,
        base_dir: &Path,
        state: &mut ResolveState,
    ) -> Result<String> {
        let request = RequestKey {
            name: name.to_string(),
            spec: spec.describe(),
            base: base_dir.to_path_buf(),
        };
        if let Some(key) = state.done.get(&request) {
            return Ok(key.clone());
        }
        if !state.in_progress.insert(request.clone()) {
            return Err(Error::Resolution {
                name: name.to_string(),
                message: "dependency cycle detected".to_string(),
            });
        }

        let pkg = self.resolve_one(name, spec, base_dir, state)?;
        let key = pkg.key();

        if let Some(existing) = state.packages.get(&key) {
            if existing.integrity != pkg.integrity {
                return Err(Error::PinConflict {
                    key,
                    first: existing.integrity.clone(),
                    second: pkg.integrity.clone(),
                });
            }
        } else {
            state.packages.insert(key.clone(), pkg);
        }

        state.in_progress.remove(&request);
        state.done.insert(request, key.clone());
        Ok(key)
    }

    fn resolve_one(
        &self,
        name: &str,
        spec: &DependencySpec,
        base_dir: &Path,
        state: &mut ResolveState,
    ) -> Result<ResolvedPackage> {
        if let Some(reused) = self.try_reuse(name, spec)? {
            debug!("reusing lockfile pin for {}", reused.key());
            return self.finish_reused(reused, state);
        }

        match spec {
            DependencySpec::Path { path } => {
                let tree = self.fetcher.fetch_path(base_dir, path)?;
                self.commit(name, spec, tree, json!({"type": "path", "path": path}), state)
            }
            DependencySpec::Git { git, rev } => {
                let tree = self
                    .fetcher
                    .fetch_git(git, rev.as_deref(), self.options.offline)?;
                self.commit(name, spec, tree, json!({"type": "git", "url": git}), state)
            }
            DependencySpec::Url { url, integrity } => {
                let integrity = integrity.as_deref().ok_or_else(|| Error::Resolution {
                    name: name.to_string(),
                    message: format!("tarball dependency {url} requires integrity"),
                })?;
                let tree = self.fetcher.fetch_tarball(
                    self.registry,
                    url,
                    Some(integrity),
                    self.options.offline,
                )?;
                self.commit(name, spec, tree, json!({"type": "tarball", "url": url}), state)
            }
            DependencySpec::Registry(range) => self.resolve_registry(name, range, state),
        }
    }

    fn resolve_registry(
        &self,
        name: &str,
        range: &str,
        state: &mut ResolveState,
    ) -> Result<ResolvedPackage> {
        let req = VersionReq::parse(range).map_err(|e| Error::Resolution {
            name: name.to_string(),
            message: format!("invalid version requirement {range:?}: {e}"),
        })?;

        if self.options.offline {
            return Err(Error::OfflineMiss {
                src: format!("{name}@{range}"),
            });
        }

        let index = self.registry.versions(name)?;
        let (version, entry) = pick_highest(&index, &req)?.ok_or_else(|| {
            Error::NoSatisfyingVersion {
                name: name.to_string(),
                spec: range.to_string(),
            }
        })?;
        info!("selected {name}@{version} for {range}");

        let (tree, source) = match &entry.source {
            SourceRecord::Git { url, commit } => (
                self.fetcher.fetch_git(url, Some(commit), false)?,
                json!({"type": "registry", "url": url}),
            ),
            SourceRecord::Tarball { url } => (
                self.fetcher
                    .fetch_tarball(self.registry, url, entry.integrity.as_deref(), false)?,
                json!({"type": "tarball", "url": url}),
            ),
        };

        let pkg = self.commit(
            name,
            &DependencySpec::Registry(range.to_string()),
            tree,
            source,
            state,
        )?;

        if pkg.name != name {
            return Err(Error::Resolution {
                name: name.to_string(),
                message: format!("registry package declares name {:?}", pkg.name),
            });
        }
        if pkg.version != version.to_string() {
            return Err(Error::Resolution {
                name: name.to_string(),
                message: format!(
                    "registry index says {version} but package declares {}",
                    pkg.version
                ),
            });
        }
        if let Some(expected) = &entry.integrity {
            if &pkg.integrity != expected {
                return Err(Error::IntegrityMismatch {
                    key: pkg.key(),
                    expected: expected.clone(),
                    actual: pkg.integrity,
                });
            }
        }
        Ok(pkg)
    }

    /// Store a fetched tree, read its manifest, and recurse into its
    /// dependencies.
    fn commit(
        &self,
        requested_name: &str,
        _spec: &DependencySpec,
        tree: FetchedTree,
        source: serde_json::Value,
        state: &mut ResolveState,
    ) -> Result<ResolvedPackage> {
        let manifest = PackageManifest::load(&tree.root)?;
        let entry = self.store.put_tree(
            &tree.root,
            &manifest.name,
            &manifest.version,
            source.clone(),
        )?;

        let mut resolved = serde_json::Map::new();
        match &tree.identity {
            ResolvedIdentity::Commit { commit, reference } => {
                resolved.insert("commit".to_string(), json!(commit));
                // The original ref is only worth recording when it names
                // something other than the commit itself.
                if let Some(r) = reference {
                    if r != commit {
                        resolved.insert("ref".to_string(), json!(r));
                    }
                }
            }
            ResolvedIdentity::Snapshot => {
                resolved.insert("snapshot".to_string(), json!(entry.digest));
            }
            ResolvedIdentity::Tarball => {}
        }

        // Children resolve against the committed payload so path deps inside
        // a package cannot reach back into the fetch staging area.
        let mut edges = BTreeMap::new();
        for (dep_name, dep_spec) in &manifest.dependencies {
            let child_key =
                self.resolve_request(dep_name, dep_spec, &entry.payload, state)?;
            let (_, child_version) = split_key(&child_key).expect("key built by package_key");
            edges.insert(dep_name.clone(), child_version.to_string());
        }

        debug!("resolved {requested_name} -> {}@{}", manifest.name, manifest.version);
        Ok(ResolvedPackage {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            source,
            resolved,
            integrity: entry.digest,
            capabilities: manifest.capabilities,
            dependencies: edges,
        })
    }

    /// Reuse a lockfile pin when the spec is still satisfied and the store
    /// already holds the content.
    fn try_reuse(&self, name: &str, spec: &DependencySpec) -> Result<Option<ResolvedPackage>> {
        let Some(lock) = self.previous else {
            return Ok(None);
        };
        if self.options.refresh.iter().any(|n| n == name) {
            return Ok(None);
        }

        let mut best: Option<(Version, &str, &LockedPackage)> = None;
        for (key, pkg) in &lock.packages {
            let Some((pkg_name, pkg_version)) = split_key(key) else {
                continue;
            };
            if pkg_name != name || !self.store.contains(&pkg.integrity) {
                continue;
            }
            if !spec_satisfied_by(spec, pkg, pkg_version) {
                continue;
            }
            let Ok(version) = Version::parse(pkg_version) else {
                continue;
            };
            let better = best
                .as_ref()
                .map(|(current, _, _)| version > *current)
                .unwrap_or(true);
            if better {
                best = Some((version, pkg_version, pkg));
            }
        }

        Ok(best.map(|(_, version, pkg)| ResolvedPackage {
            name: name.to_string(),
            version: version.to_string(),
            source: pkg.source.clone(),
            resolved: pkg.resolved.clone(),
            integrity: pkg.integrity.clone(),
            capabilities: Capabilities {
                exec: pkg.capabilities.get("exec").copied().unwrap_or(false),
                network: pkg.capabilities.get("network").copied().unwrap_or(false),
                mcp: pkg.capabilities.get("mcp").copied().unwrap_or(false),
            },
            dependencies: pkg.dependencies.clone(),
        }))
    }

    /// A reused pin's transitive closure also comes from the lockfile; each
    /// edge resolves as an exact-version registry request so the store-hit
    /// path stays offline-safe.
    fn finish_reused(
        &self,
        pkg: ResolvedPackage,
        state: &mut ResolveState,
    ) -> Result<ResolvedPackage> {
        for (dep_name, dep_version) in &pkg.dependencies {
            let child_spec = DependencySpec::Registry(format!("={dep_version}"));
            self.resolve_request(dep_name, &child_spec, self.workspace_root, state)?;
        }
        Ok(pkg)
    }
}

/// Whether a lockfile pin still satisfies a manifest spec.
fn spec_satisfied_by(spec: &DependencySpec, pkg: &LockedPackage, pin_version: &str) -> bool {
    match spec {
        DependencySpec::Registry(range) => {
            let Ok(req) = VersionReq::parse(range) else {
                return false;
            };
            let Ok(version) = Version::parse(pin_version) else {
                return false;
            };
            req.matches(&version)
        }
        DependencySpec::Git { git, rev } => {
            let source_url = pkg.source.get("url").and_then(|v| v.as_str());
            if source_url != Some(git.as_str()) {
                return false;
            }
            match rev {
                None => true,
                Some(rev) => {
                    let commit = pkg.resolved.get("commit").and_then(|v| v.as_str());
                    let reference = pkg.resolved.get("ref").and_then(|v| v.as_str());
                    commit == Some(rev.as_str()) || reference == Some(rev.as_str())
                }
            }
        }
        // Path snapshots are never reused: content may have changed.
        DependencySpec::Path { .. } => false,
        DependencySpec::Url { url, integrity } => {
            let source_url = pkg.source.get("url").and_then(|v| v.as_str());
            source_url == Some(url.as_str())
                && integrity.as_deref() == Some(pkg.integrity.as_str())
        }
    }
}

#[derive(Default)]
struct ResolveState {
    packages: BTreeMap<String, ResolvedPackage>,
    done: HashMap<RequestKey, String>,
    in_progress: HashSet<RequestKey>,
}
