//! Shared test utilities for integration and E2E tests.
//!
//! Provides a workspace fixture with an isolated global store and registry
//! so tests never touch the real user environment or the network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::TestFixture;
//!
//! #[test]
//! fn test_example() {
//!     let fx = TestFixture::new().with_manifest(common::manifests::EMPTY);
//!     fx.command().arg("install").assert().success();
//! }
//! ```

use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;

/// Common manifest snippets for testing.
#[allow(dead_code)]
pub mod manifests {
    /// Valid manifest with no dependencies.
    pub const EMPTY: &str = "version = 1\n";

    /// Manifest with auto-sync and catalog disabled, for tests that drive
    /// sync explicitly.
    pub const NO_AUTOSYNC: &str = "\
version = 1

[sync]
onAdd = false
onInstall = false
catalog = false
";

    /// Invalid TOML for parse-error testing.
    pub const INVALID: &str = "version = = 1\n";
}

/// A temp workspace with its own store, registry dir, and config home.
pub struct TestFixture {
    temp: TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        temp.child("store").create_dir_all().unwrap();
        temp.child("registry").create_dir_all().unwrap();
        temp.child("ws").create_dir_all().unwrap();
        Self { temp }
    }

    /// Workspace root.
    pub fn root(&self) -> PathBuf {
        self.temp.path().join("ws")
    }

    /// Isolated global store root.
    pub fn store_dir(&self) -> PathBuf {
        self.temp.path().join("store")
    }

    /// Static registry directory served via a `file://` base URL.
    pub fn registry_dir(&self) -> PathBuf {
        self.temp.path().join("registry")
    }

    pub fn registry_url(&self) -> String {
        format!("file://{}", self.registry_dir().display())
    }

    /// Write `botpack.toml` in the workspace.
    pub fn with_manifest(self, content: &str) -> Self {
        std::fs::write(self.root().join("botpack.toml"), content).unwrap();
        self
    }

    /// Append lines to the manifest.
    pub fn append_manifest(&self, content: &str) {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(self.root().join("botpack.toml"))
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    /// Add a file under the workspace root.
    pub fn with_file(self, rel: &str, content: &str) -> Self {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
        self
    }

    /// Create a package directory (outside the workspace) with a manifest
    /// and one skill.
    pub fn make_package(&self, dir: &str, name: &str, version: &str, skill_id: &str) -> PathBuf {
        self.make_package_with(dir, name, version, skill_id, "")
    }

    /// Same, with extra `agentpkg.toml` lines (capabilities, dependencies).
    pub fn make_package_with(
        &self,
        dir: &str,
        name: &str,
        version: &str,
        skill_id: &str,
        extra_manifest: &str,
    ) -> PathBuf {
        let root = self.temp.path().join(dir);
        let skill = root.join("skills").join(skill_id);
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(
            skill.join("SKILL.md"),
            format!("---\nname: {skill_id}\ndescription: test skill\n---\n# {skill_id}\n"),
        )
        .unwrap();
        std::fs::write(
            root.join("agentpkg.toml"),
            format!(
                "agentpkg = \"1\"\nname = \"{name}\"\nversion = \"{version}\"\n{extra_manifest}"
            ),
        )
        .unwrap();
        root
    }

    /// Turn a directory into a git repository with one commit; returns the
    /// commit sha.
    pub fn git_init(&self, dir: &Path) -> String {
        run_git(dir, &["init", "--quiet"]);
        run_git(dir, &["add", "."]);
        run_git(
            dir,
            &[
                "-c",
                "user.name=botpack-tests",
                "-c",
                "user.email=tests@example.invalid",
                "commit",
                "--quiet",
                "-m",
                "init",
            ],
        );
        let out = StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["rev-parse", "HEAD"])
            .output()
            .expect("git rev-parse");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// Publish a package version in the file registry, pointing at a local
    /// git repository.
    pub fn publish(&self, name: &str, version: &str, repo: &Path, commit: &str) {
        let pkg_dir = self.registry_dir().join(name);
        std::fs::create_dir_all(&pkg_dir).unwrap();
        let index_path = pkg_dir.join("versions.json");

        let mut index: serde_json::Value = if index_path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&index_path).unwrap()).unwrap()
        } else {
            serde_json::json!({"schema": 1, "name": name, "versions": {}})
        };
        index["versions"][version] = serde_json::json!({
            "source": {"type": "git", "url": repo.display().to_string(), "commit": commit},
        });
        std::fs::write(&index_path, serde_json::to_string_pretty(&index).unwrap()).unwrap();
    }

    /// A botpack command wired to this fixture's workspace, store, and
    /// registry.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("botpack").expect("botpack binary");
        cmd.current_dir(self.root())
            .arg("--root")
            .arg(self.root())
            .env("BOTPACK_STORE", self.store_dir())
            .env("BOTPACK_REGISTRY_URL", self.registry_url())
            .env_remove("BOTPACK_ROOT")
            .env("NO_COLOR", "1");
        cmd
    }

    /// Read a workspace file to a string.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root().join(rel))
            .unwrap_or_else(|e| panic!("read {rel}: {e}"))
    }

    pub fn exists(&self, rel: &str) -> bool {
        let p = self.root().join(rel);
        p.exists() || p.symlink_metadata().is_ok()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
fn run_git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}
