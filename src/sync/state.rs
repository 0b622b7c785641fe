//! Sync state tracking.
//!
//! After every materialization the engine records, per target, the tool
//! version, a hash of the target configuration, and one entry per written
//! path: where it came from and the checksum of what was written. Drift
//! detection compares these checksums against the disk before the next
//! apply.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// One materialized path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathState {
    /// Source asset address (`workspace:<id>`, `<name@version>:<id>`, or
    /// `generated:<what>`).
    pub source: String,
    /// Content checksum of what was written (`sha256:<hex>`).
    pub checksum: String,
    /// Symlink target when the path was materialized as a link. A link
    /// still pointing here is tool-managed even when the linked content
    /// has changed (the change came through the source, not the output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Everything recorded for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub version: u32,
    pub target: String,
    pub tool_version: String,
    /// Hash of the target configuration that produced this state; a changed
    /// target layout invalidates cheap no-op detection.
    pub target_config_hash: String,
    /// Written paths relative to the workspace root, in sorted order.
    pub paths: BTreeMap<String, PathState>,
}

impl SyncState {
    pub fn new(target: &str, target_config_hash: &str) -> Self {
        Self {
            version: 1,
            target: target.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            target_config_hash: target_config_hash.to_string(),
            paths: BTreeMap::new(),
        }
    }

    /// Load previous state; absent or unreadable state is treated as empty
    /// (first sync, or a state file from an incompatible build).
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Self>(&text) {
            Ok(state) if state.version == 1 => state,
            _ => Self::default(),
        }
    }

    /// Write atomically (temp + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = crate::lockfile::canonical_json(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Checksum of raw bytes, formatted like store digests.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Content checksum of a materialized path, independent of link mode.
///
/// Symlinks are followed so a symlinked materialization and a copied one
/// hash identically. Skill directories hash their `SKILL.md`. Returns None
/// when the path is missing or unreadable.
pub fn checksum_path(path: &Path) -> Option<String> {
    let meta = fs::metadata(path).ok()?;
    if meta.is_dir() {
        return checksum_path(&path.join("SKILL.md"));
    }
    let bytes = fs::read(path).ok()?;
    Some(checksum_bytes(&bytes))
}
