//! Error handling types for botpack.
//!
//! Every failure surfaced at the command boundary carries one of a small set
//! of error kinds, each mirrored by a process exit code. Commands render the
//! error either as a multi-line plain message or, under `--json`, as a
//! structured `{ok:false, kind, object, reason, hint?}` object.

use std::path::PathBuf;

use thiserror::Error;

/// Process exit codes, mirroring [`ErrorKind`].
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERIC: i32 = 1;
    pub const PARSE: i32 = 2;
    pub const RESOLUTION: i32 = 3;
    pub const FETCH_STORE: i32 = 4;
    pub const SYNC: i32 = 5;
    pub const TRUST_BLOCKED: i32 = 6;
}

/// Coarse classification of an [`Error`], used for exit codes and `--json`
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Manifest, lockfile, or asset metadata could not be parsed or validated.
    Parse,
    /// No satisfying version, a frozen-lockfile mismatch, or a pin conflict.
    Resolution,
    /// A source could not be obtained (network, git, offline cache miss).
    Fetch,
    /// The content-addressed store is missing or corrupt.
    Store,
    /// A materialization conflict: collisions, drift, or a failed swap.
    Sync,
    /// A capability-bearing asset has no recorded trust decision.
    TrustBlocked,
    /// Everything else.
    Generic,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Parse => exit_codes::PARSE,
            ErrorKind::Resolution => exit_codes::RESOLUTION,
            ErrorKind::Fetch | ErrorKind::Store => exit_codes::FETCH_STORE,
            ErrorKind::Sync => exit_codes::SYNC,
            ErrorKind::TrustBlocked => exit_codes::TRUST_BLOCKED,
            ErrorKind::Generic => exit_codes::GENERIC,
        }
    }

    /// Stable kind name for `--json` output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Store => "store",
            ErrorKind::Sync => "sync",
            ErrorKind::TrustBlocked => "trust-blocked",
            ErrorKind::Generic => "generic",
        }
    }
}

/// Main error type for botpack operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid TOML in {path}: {message}")]
    TomlParse { path: PathBuf, message: String },

    #[error("invalid config in {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("invalid lockfile {path}: {message}")]
    LockfileInvalid { path: PathBuf, message: String },

    #[error("invalid frontmatter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("invalid PEP 723 block in {path}: {message}")]
    Pep723 { path: PathBuf, message: String },

    #[error("no version of {name} satisfies {spec}")]
    NoSatisfyingVersion { name: String, spec: String },

    #[error("cannot resolve {name}: {message}")]
    Resolution { name: String, message: String },

    #[error("{key} resolved twice with different contents ({first} vs {second})")]
    PinConflict {
        key: String,
        first: String,
        second: String,
    },

    #[error("lockfile is out of date: {message}")]
    FrozenLockfile { message: String },

    #[error("failed to fetch {src}: {message}")]
    Fetch { src: String, message: String },

    #[error("offline: {src} is not available in the store")]
    OfflineMiss { src: String },

    #[error("registry index at {url} is invalid: {message}")]
    RegistryIndex { url: String, message: String },

    #[error("git {command} failed for {url}: {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    #[error("store entry {digest}: {message}")]
    Store { digest: String, message: String },

    #[error("{key}: integrity mismatch (expected {expected}, actual {actual})")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("sync conflict: {} modified outside botpack", paths.join(", "))]
    SyncDrift { paths: Vec<String> },

    #[error("output collision at {path}: {first} and {second}")]
    OutputCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("alias collision: {alias} maps to an existing output name")]
    AliasCollision { alias: String },

    #[error("duplicate MCP server fqid: {fqid}")]
    DuplicateServer { fqid: String },

    #[error("sync failed for target {target}: {message}")]
    SyncApply { target: String, message: String },

    #[error("{key}: {reason}")]
    TrustBlocked { key: String, reason: String },

    #[error("unknown target: {target}")]
    UnknownTarget { target: String },

    #[error("workspace manifest not found (searched upward from {start})")]
    WorkspaceNotFound { start: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Classify this error for exit codes and `--json` rendering.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TomlParse { .. }
            | Error::ConfigInvalid { .. }
            | Error::LockfileInvalid { .. }
            | Error::Frontmatter { .. }
            | Error::Pep723 { .. }
            | Error::Json(_) => ErrorKind::Parse,
            Error::NoSatisfyingVersion { .. }
            | Error::Resolution { .. }
            | Error::PinConflict { .. }
            | Error::FrozenLockfile { .. } => ErrorKind::Resolution,
            Error::Fetch { .. }
            | Error::OfflineMiss { .. }
            | Error::RegistryIndex { .. }
            | Error::GitCommand { .. } => ErrorKind::Fetch,
            Error::Store { .. } | Error::IntegrityMismatch { .. } => ErrorKind::Store,
            Error::SyncDrift { .. }
            | Error::OutputCollision { .. }
            | Error::AliasCollision { .. }
            | Error::DuplicateServer { .. }
            | Error::SyncApply { .. }
            | Error::UnknownTarget { .. } => ErrorKind::Sync,
            Error::TrustBlocked { .. } => ErrorKind::TrustBlocked,
            Error::WorkspaceNotFound { .. } | Error::Io(_) | Error::Generic(_) => {
                ErrorKind::Generic
            }
        }
    }

    /// Primary object the error is about, when one exists.
    pub fn object(&self) -> Option<String> {
        match self {
            Error::TomlParse { path, .. }
            | Error::ConfigInvalid { path, .. }
            | Error::LockfileInvalid { path, .. }
            | Error::Frontmatter { path, .. }
            | Error::Pep723 { path, .. } => Some(path.display().to_string()),
            Error::NoSatisfyingVersion { name, .. } | Error::Resolution { name, .. } => {
                Some(name.clone())
            }
            Error::PinConflict { key, .. }
            | Error::IntegrityMismatch { key, .. }
            | Error::TrustBlocked { key, .. } => Some(key.clone()),
            Error::Fetch { src, .. } | Error::OfflineMiss { src } => Some(src.clone()),
            Error::RegistryIndex { url, .. } | Error::GitCommand { url, .. } => Some(url.clone()),
            Error::Store { digest, .. } => Some(digest.clone()),
            Error::OutputCollision { path, .. } => Some(path.clone()),
            Error::DuplicateServer { fqid } => Some(fqid.clone()),
            Error::SyncApply { target, .. } | Error::UnknownTarget { target } => {
                Some(target.clone())
            }
            _ => None,
        }
    }

    /// A concrete remediation, when one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::TrustBlocked { key, .. } => Some(format!(
                "run `botpack trust {} --allow exec --allow mcp` to record a decision",
                key
            )),
            Error::SyncDrift { .. } => {
                Some("re-run with --force to overwrite local modifications".to_string())
            }
            Error::FrozenLockfile { .. } => {
                Some("re-run `botpack install` without --frozen-lockfile".to_string())
            }
            Error::OfflineMiss { .. } => {
                Some("run `botpack prefetch` while online first".to_string())
            }
            _ => None,
        }
    }
}

/// Result type alias for botpack operations.
pub type Result<T> = std::result::Result<T, Error>;
