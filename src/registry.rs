//! # Static Registry Index
//!
//! The registry is a static HTTP index: `GET <base>/<name>/versions.json`
//! returns every published version of a package together with its source
//! record. Registry entries are immutable; re-fetching the same version must
//! yield the same record.
//!
//! `file://` base URLs are also supported so tests and air-gapped setups can
//! serve an index from a directory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use semver::{Version, VersionReq};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default registry base, overridable with `BOTPACK_REGISTRY_URL`.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.botpack.dev/index";

/// Default network timeout for index and tarball fetches.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Resolve the registry base URL from the environment, once, at command
/// entry.
pub fn base_url_from_env() -> String {
    std::env::var("BOTPACK_REGISTRY_URL")
        .unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Where a published version's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum SourceRecord {
    /// Git repository pinned to an immutable commit.
    Git { url: String, commit: String },
    /// Tarball URL; integrity comes from the version entry.
    Tarball { url: String },
}

impl SourceRecord {
    /// URL used for deterministic tie-breaking between equal versions.
    pub fn url(&self) -> &str {
        match self {
            SourceRecord::Git { url, .. } => url,
            SourceRecord::Tarball { url } => url,
        }
    }
}

/// One published version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionEntry {
    pub source: SourceRecord,
    #[serde(default)]
    pub integrity: Option<String>,
}

/// The `versions.json` document for one package.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionsIndex {
    pub schema: u32,
    pub name: String,
    pub versions: BTreeMap<String, VersionEntry>,
}

/// Blocking client for the static registry index.
pub struct RegistryClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl RegistryClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        url::Url::parse(&base_url).map_err(|e| Error::RegistryIndex {
            url: base_url.clone(),
            message: format!("invalid registry base URL: {e}"),
        })?;
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("botpack/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Fetch {
                src: base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the versions index for a package. Scoped names keep their
    /// `@` and `/` so the index stays readable on disk.
    pub fn versions_url(&self, name: &str) -> String {
        format!("{}/{}/versions.json", self.base_url, name)
    }

    /// Fetch and validate the versions index for a package.
    pub fn versions(&self, name: &str) -> Result<VersionsIndex> {
        let url = self.versions_url(name);
        let body = self.fetch_text(&url)?;
        let index: VersionsIndex =
            serde_json::from_str(&body).map_err(|e| Error::RegistryIndex {
                url: url.clone(),
                message: e.to_string(),
            })?;
        if index.schema != 1 {
            return Err(Error::RegistryIndex {
                url,
                message: format!("unsupported schema {}", index.schema),
            });
        }
        if index.name != name {
            return Err(Error::RegistryIndex {
                url,
                message: format!("index is for {:?}, expected {:?}", index.name, name),
            });
        }
        Ok(index)
    }

    /// Download raw bytes from a registry-adjacent URL (tarballs).
    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = file_url_path(url) {
            return std::fs::read(&path).map_err(|e| Error::Fetch {
                src: url.to_string(),
                message: e.to_string(),
            });
        }
        let resp = self.http.get(url).send().map_err(|e| Error::Fetch {
            src: url.to_string(),
            message: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(Error::Fetch {
                src: url.to_string(),
                message: format!("HTTP {}", resp.status()),
            });
        }
        let bytes = resp.bytes().map_err(|e| Error::Fetch {
            src: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url)?;
        String::from_utf8(bytes).map_err(|e| Error::Fetch {
            src: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Map a `file://` URL to a filesystem path, or None for other schemes.
fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

/// Select the highest version satisfying `req`.
///
/// Ties between equal versions cannot occur within one index (versions are
/// map keys); across candidate lists the caller breaks ties by higher
/// version first, then lexicographically smaller source URL.
pub fn pick_highest<'a>(
    index: &'a VersionsIndex,
    req: &VersionReq,
) -> Result<Option<(Version, &'a VersionEntry)>> {
    let mut best: Option<(Version, &VersionEntry)> = None;
    for (raw, entry) in &index.versions {
        let version = Version::parse(raw).map_err(|e| Error::RegistryIndex {
            url: index.name.clone(),
            message: format!("invalid version {raw:?}: {e}"),
        })?;
        if !req.matches(&version) {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, current_entry)) => {
                version > *current
                    || (version == *current
                        && entry.source.url() < current_entry.source.url())
            }
        };
        if better {
            best = Some((version, entry));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(versions: &[(&str, &str)]) -> VersionsIndex {
        VersionsIndex {
            schema: 1,
            name: "@acme/quality-skills".to_string(),
            versions: versions
                .iter()
                .map(|(v, url)| {
                    (
                        v.to_string(),
                        VersionEntry {
                            source: SourceRecord::Git {
                                url: url.to_string(),
                                commit: "c".repeat(40),
                            },
                            integrity: None,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_pick_highest_satisfying() {
        let idx = index(&[
            ("1.9.0", "https://a"),
            ("2.0.0", "https://a"),
            ("2.1.0", "https://a"),
            ("3.0.0", "https://a"),
        ]);
        let req = VersionReq::parse("^2").unwrap();
        let (version, _) = pick_highest(&idx, &req).unwrap().unwrap();
        assert_eq!(version, Version::new(2, 1, 0));
    }

    #[test]
    fn test_pick_none_when_unsatisfied() {
        let idx = index(&[("1.0.0", "https://a")]);
        let req = VersionReq::parse("^2").unwrap();
        assert!(pick_highest(&idx, &req).unwrap().is_none());
    }

    #[test]
    fn test_prerelease_not_matched_by_plain_range() {
        let idx = index(&[("2.0.0-rc.1", "https://a"), ("1.5.0", "https://a")]);
        let req = VersionReq::parse("^1").unwrap();
        let (version, _) = pick_highest(&idx, &req).unwrap().unwrap();
        assert_eq!(version, Version::new(1, 5, 0));
    }

    #[test]
    fn test_versions_index_strict_parse() {
        let good = r#"{"schema":1,"name":"p","versions":{"1.0.0":{"source":{"type":"git","url":"u","commit":"c"}}}}"#;
        let idx: VersionsIndex = serde_json::from_str(good).unwrap();
        assert_eq!(idx.versions.len(), 1);

        let bad = r#"{"schema":1,"name":"p","versions":{},"extra":true}"#;
        assert!(serde_json::from_str::<VersionsIndex>(bad).is_err());
    }

    #[test]
    fn test_versions_url_keeps_scoped_names() {
        let client =
            RegistryClient::new("https://reg.example".to_string(), DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            client.versions_url("@acme/quality-skills"),
            "https://reg.example/@acme/quality-skills/versions.json"
        );
    }

    #[test]
    fn test_file_registry() {
        let temp = tempfile::TempDir::new().unwrap();
        let pkg_dir = temp.path().join("@acme/quality-skills");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(
            pkg_dir.join("versions.json"),
            r#"{"schema":1,"name":"@acme/quality-skills","versions":{"2.1.0":{"source":{"type":"git","url":"https://example.com/r.git","commit":"0000000000000000000000000000000000000000"}}}}"#,
        )
        .unwrap();

        let base = format!("file://{}", temp.path().display());
        let client = RegistryClient::new(base, DEFAULT_TIMEOUT).unwrap();
        let idx = client.versions("@acme/quality-skills").unwrap();
        assert!(idx.versions.contains_key("2.1.0"));
    }

    #[test]
    fn test_missing_index_is_fetch_error() {
        let client = RegistryClient::new("file:///nonexistent-dir".to_string(), DEFAULT_TIMEOUT)
            .unwrap();
        let err = client.versions("nope").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fetch);
    }
}
