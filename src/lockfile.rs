//! # Lockfile (`botpack.lock`)
//!
//! The lockfile is the deterministic serialization of the resolved graph:
//! same manifest, registry snapshot, and source content always produce
//! byte-identical output, across runs, OS, and machine.
//!
//! Canonical JSON rules: object keys sorted lexicographically, 2-space
//! indent, LF line endings, a final newline, and no timestamps or
//! host-specific paths. `serde_json`'s default map is ordered, so
//! serializing through `serde_json::Value` yields sorted keys for free.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lockfile schema version.
pub const LOCKFILE_VERSION: u32 = 1;

/// Spec version of the resolved-graph semantics.
pub const SPEC_VERSION: &str = "1";

/// Compute the stable package key `name@version`.
///
/// Names may be scoped (`@acme/pkg`), so keys are split from the right.
pub fn package_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Split a package key back into `(name, version)`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once('@')
        .filter(|(name, version)| !name.is_empty() && !version.is_empty())
}

/// A resolved package entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockedPackage {
    /// Tagged source record, e.g. `{"type":"git","url":...}`.
    pub source: serde_json::Value,
    /// Resolution details: commit + original ref for git, nothing for
    /// snapshots and tarballs (the integrity is the identity).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub resolved: serde_json::Map<String, serde_json::Value>,
    /// Content digest with algorithm prefix (`sha256:<hex>`).
    pub integrity: String,
    /// Flat name → version edges into `packages`.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
}

/// The lockfile model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Lockfile {
    pub lockfile_version: u32,
    pub botpack_version: String,
    pub spec_version: String,
    /// The manifest's direct-dependency table, copied verbatim.
    #[serde(default)]
    pub dependencies: BTreeMap<String, serde_json::Value>,
    /// Resolved packages keyed by `name@version`.
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,
}

impl Lockfile {
    pub fn new(
        dependencies: BTreeMap<String, serde_json::Value>,
        packages: BTreeMap<String, LockedPackage>,
    ) -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION,
            botpack_version: env!("CARGO_PKG_VERSION").to_string(),
            spec_version: SPEC_VERSION.to_string(),
            dependencies,
            packages,
        }
    }

    /// Canonical serialization; always ends with a newline.
    pub fn to_canonical_json(&self) -> Result<String> {
        canonical_json(self)
    }

    /// Load and validate `botpack.lock`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::LockfileInvalid {
            path: path.to_path_buf(),
            message: format!("unable to read: {e}"),
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let lock: Lockfile =
            serde_json::from_str(text).map_err(|e| Error::LockfileInvalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if lock.lockfile_version != LOCKFILE_VERSION {
            return Err(Error::LockfileInvalid {
                path: path.to_path_buf(),
                message: format!(
                    "unsupported lockfileVersion {} (expected {LOCKFILE_VERSION})",
                    lock.lockfile_version
                ),
            });
        }
        if lock.spec_version != SPEC_VERSION {
            return Err(Error::LockfileInvalid {
                path: path.to_path_buf(),
                message: format!(
                    "unsupported specVersion {:?} (expected {SPEC_VERSION:?})",
                    lock.spec_version
                ),
            });
        }
        for (key, pkg) in &lock.packages {
            if split_key(key).is_none() {
                return Err(Error::LockfileInvalid {
                    path: path.to_path_buf(),
                    message: format!("invalid package key {key:?}"),
                });
            }
            if pkg.integrity.is_empty() {
                return Err(Error::LockfileInvalid {
                    path: path.to_path_buf(),
                    message: format!("{key}: integrity is required"),
                });
            }
        }
        Ok(lock)
    }

    /// Write atomically (temp + rename) with canonical formatting.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_canonical_json()?;
        let tmp = path.with_extension("lock.tmp");
        fs::write(&tmp, &text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// All store digests referenced by this lockfile.
    pub fn referenced_digests(&self) -> std::collections::BTreeSet<String> {
        self.packages
            .values()
            .map(|p| p.integrity.clone())
            .collect()
    }
}

/// Serialize any value as canonical JSON: sorted keys, 2-space indent,
/// trailing newline.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    // Round-trip through Value so map keys land in sorted order regardless
    // of struct field declaration order at the top level of each object.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string_pretty(&value)? + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Lockfile {
        let mut deps = BTreeMap::new();
        deps.insert("@acme/quality-skills".to_string(), json!("^2"));
        let mut packages = BTreeMap::new();
        packages.insert(
            "@acme/quality-skills@2.1.0".to_string(),
            LockedPackage {
                source: json!({"type": "git", "url": "https://example.com/r.git"}),
                resolved: json!({"commit": "a".repeat(40), "ref": "v2.1.0"})
                    .as_object()
                    .unwrap()
                    .clone(),
                integrity: "sha256:abc".to_string(),
                dependencies: BTreeMap::new(),
                capabilities: BTreeMap::from([("exec".to_string(), false)]),
            },
        );
        Lockfile::new(deps, packages)
    }

    #[test]
    fn test_roundtrip() {
        let lock = sample();
        let text = lock.to_canonical_json().unwrap();
        let parsed = Lockfile::parse(Path::new("botpack.lock"), &text).unwrap();
        assert_eq!(lock, parsed);
    }

    #[test]
    fn test_canonical_output_is_stable() {
        let a = sample().to_canonical_json().unwrap();
        let b = sample().to_canonical_json().unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with('\n'));
        assert!(!a.contains('\r'));
    }

    #[test]
    fn test_keys_are_sorted() {
        let text = sample().to_canonical_json().unwrap();
        let bp = text.find("\"botpackVersion\"").unwrap();
        let deps = text.find("\"dependencies\"").unwrap();
        let lfv = text.find("\"lockfileVersion\"").unwrap();
        let pkgs = text.find("\"packages\"").unwrap();
        let spec = text.find("\"specVersion\"").unwrap();
        assert!(bp < deps && deps < lfv && lfv < pkgs && pkgs < spec);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_canonical_json().unwrap()).unwrap();
        value["surprise"] = json!(true);
        let err = Lockfile::parse(Path::new("botpack.lock"), &value.to_string()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_canonical_json().unwrap()).unwrap();
        value["lockfileVersion"] = json!(99);
        assert!(Lockfile::parse(Path::new("botpack.lock"), &value.to_string()).is_err());
    }

    #[test]
    fn test_split_key_handles_scopes() {
        assert_eq!(
            split_key("@acme/quality-skills@2.1.0"),
            Some(("@acme/quality-skills", "2.1.0"))
        );
        assert_eq!(split_key("plain@1.0.0"), Some(("plain", "1.0.0")));
        assert_eq!(split_key("noversion"), None);
    }

    #[test]
    fn test_missing_integrity_rejected() {
        let text = r#"{
  "botpackVersion": "0.1.0",
  "dependencies": {},
  "lockfileVersion": 1,
  "packages": {
    "x@1.0.0": {
      "integrity": "",
      "source": {"type": "path"}
    }
  },
  "specVersion": "1"
}"#;
        assert!(Lockfile::parse(Path::new("botpack.lock"), text).is_err());
    }

    #[test]
    fn test_save_is_atomic_and_loadable() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("botpack.lock");
        let lock = sample();
        lock.save(&path).unwrap();
        assert_eq!(Lockfile::load(&path).unwrap(), lock);
        assert!(!temp.path().join("botpack.lock.tmp").exists());
    }
}
