//! # Package Manifest (`agentpkg.toml`)
//!
//! Every fetched package embeds an `agentpkg.toml` describing its identity,
//! declared capabilities, and its own dependencies. Parsing is strict: the
//! key set is closed and unknown keys are *parse* errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::DependencySpec;

/// Package manifest filename inside a package tree.
pub const PACKAGE_MANIFEST_FILENAME: &str = "agentpkg.toml";

/// Declared risk-bearing properties of a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Capabilities {
    pub exec: bool,
    pub network: bool,
    pub mcp: bool,
}

impl Capabilities {
    /// True when the package needs any trust decision at all.
    pub fn bearing(&self) -> bool {
        self.exec || self.mcp
    }
}

/// Runtime compatibility tags, e.g. `["claude>=1.0"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Compat {
    pub requires: Vec<String>,
}

/// Optional explicit export lists; absent lists mean "everything scanned".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Exports {
    pub skills: Option<Vec<String>>,
    pub commands: Option<Vec<String>>,
    pub agents: Option<Vec<String>>,
}

/// A parsed `agentpkg.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    /// Schema marker, e.g. `"1"`.
    pub agentpkg: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub license: Option<String>,
    pub repository: Option<String>,
    pub compat: Compat,
    pub exports: Exports,
    pub capabilities: Capabilities,
    /// Transitive dependencies, same spec forms as the project manifest.
    /// Path dependencies are resolved relative to the package tree.
    pub dependencies: BTreeMap<String, DependencySpec>,
}

impl PackageManifest {
    /// `name@version` key used in the lockfile and trust file.
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Load `agentpkg.toml` from a package tree root (or an explicit file).
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(PACKAGE_MANIFEST_FILENAME)
        } else {
            path.to_path_buf()
        };
        let text = fs::read_to_string(&file).map_err(|e| Error::ConfigInvalid {
            path: file.clone(),
            message: format!("unable to read file: {e}"),
        })?;
        Self::parse(&file, &text)
    }

    /// Parse and validate package manifest text.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let value: toml::Value = text.parse().map_err(|e: toml::de::Error| Error::TomlParse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        let raw: RawPackageManifest =
            value.try_into().map_err(|e: toml::de::Error| Error::ConfigInvalid {
                path: path.to_path_buf(),
                message: e.message().to_string(),
            })?;

        let mut dependencies = BTreeMap::new();
        for (name, spec) in &raw.dependencies {
            dependencies.insert(name.clone(), parse_package_dep(path, name, spec)?);
        }

        if raw.name.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                path: path.to_path_buf(),
                message: "name: must be non-empty".to_string(),
            });
        }
        if raw.version.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                path: path.to_path_buf(),
                message: "version: must be non-empty".to_string(),
            });
        }

        Ok(PackageManifest {
            agentpkg: raw.agentpkg,
            name: raw.name,
            version: raw.version,
            description: raw.description,
            license: raw.license,
            repository: raw.repository,
            compat: raw.compat,
            exports: raw.exports,
            capabilities: raw.capabilities,
            dependencies,
        })
    }
}

/// Serde shape; dependency values stay untyped until the strict pass.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackageManifest {
    agentpkg: String,
    name: String,
    version: String,
    description: Option<String>,
    license: Option<String>,
    repository: Option<String>,
    #[serde(default)]
    compat: Compat,
    #[serde(default)]
    exports: Exports,
    #[serde(default)]
    capabilities: Capabilities,
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
}

fn parse_package_dep(path: &Path, name: &str, spec: &toml::Value) -> Result<DependencySpec> {
    // Same forms as the project manifest; reuse its validation through a
    // one-entry table.
    let mut deps = toml::Table::new();
    deps.insert(name.to_string(), spec.clone());
    let mut top = toml::Table::new();
    top.insert("version".to_string(), toml::Value::Integer(1));
    top.insert("dependencies".to_string(), toml::Value::Table(deps));
    let manifest = crate::manifest::Manifest::parse(
        path,
        &toml::to_string(&toml::Value::Table(top)).expect("table serializes"),
    )?;
    Ok(manifest.dependencies[name].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<PackageManifest> {
        PackageManifest::parse(Path::new("agentpkg.toml"), text)
    }

    #[test]
    fn test_minimal_package() {
        let pkg = parse(
            r#"
agentpkg = "1"
name = "@acme/quality-skills"
version = "2.1.0"
"#,
        )
        .unwrap();
        assert_eq!(pkg.key(), "@acme/quality-skills@2.1.0");
        assert!(!pkg.capabilities.bearing());
        assert!(pkg.dependencies.is_empty());
    }

    #[test]
    fn test_capabilities_and_deps() {
        let pkg = parse(
            r#"
agentpkg = "1"
name = "@acme/mcp-pack"
version = "0.3.0"
description = "Postgres MCP server"

[capabilities]
exec = true
mcp = true

[dependencies]
"@acme/base" = "^1.2"
"#,
        )
        .unwrap();
        assert!(pkg.capabilities.exec);
        assert!(pkg.capabilities.mcp);
        assert!(pkg.capabilities.bearing());
        assert_eq!(
            pkg.dependencies["@acme/base"],
            DependencySpec::Registry("^1.2".to_string())
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse("agentpkg = \"1\"\nname = \"x\"\nversion = \"1.0.0\"\nbogus = 1\n")
            .unwrap_err();
        assert!(err.to_string().contains("bogus") || err.to_string().contains("unknown"));
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let err = parse(
            "agentpkg = \"1\"\nname = \"x\"\nversion = \"1.0.0\"\n[capabilities]\nfilesystem = true\n",
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(parse("agentpkg = \"1\"\nname = \"\"\nversion = \"1.0.0\"\n").is_err());
    }

    #[test]
    fn test_compat_requires() {
        let pkg = parse(
            "agentpkg = \"1\"\nname = \"x\"\nversion = \"1.0.0\"\n[compat]\nrequires = [\"claude>=1.0\"]\n",
        )
        .unwrap();
        assert_eq!(pkg.compat.requires, vec!["claude>=1.0"]);
    }
}
