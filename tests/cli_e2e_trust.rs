//! End-to-end tests for the trust gate (S4) and the audit command.

mod common;

use common::{manifests, TestFixture};
use predicates::prelude::*;

const SERVERS_TOML: &str = r#"version = 1

[[server]]
id = "postgres"
name = "Postgres access"
command = "npx"
args = ["-y", "@acme/postgres-mcp"]
"#;

fn fixture_with_mcp_package() -> TestFixture {
    let fx = TestFixture::new().with_manifest(manifests::NO_AUTOSYNC);
    let pkg = fx.make_package_with(
        "pkg-mcp",
        "@acme/mcp-pack",
        "0.3.0",
        "db_helper",
        "[capabilities]\nexec = true\nmcp = true\n",
    );
    std::fs::create_dir_all(pkg.join("mcp")).unwrap();
    std::fs::write(pkg.join("mcp/servers.toml"), SERVERS_TOML).unwrap();
    fx.append_manifest(&format!(
        "\n[dependencies]\n\"@acme/mcp-pack\" = {{ path = \"{}\" }}\n",
        pkg.display()
    ));
    fx.command().arg("install").assert().success();
    fx
}

/// S4: non-interactive sync of an untrusted exec-bearing server exits 6
/// and leaves mcp.json untouched; after a trust decision it succeeds with
/// the fqid present.
#[test]
fn test_trust_gate_blocks_then_allows() {
    let fx = fixture_with_mcp_package();

    fx.command()
        .args(["sync", "claude"])
        .assert()
        .failure()
        .code(6)
        .stderr(predicate::str::contains("trust"));
    assert!(!fx.exists(".claude/mcp.json"));

    fx.command()
        .args([
            "trust",
            "@acme/mcp-pack@0.3.0",
            "--allow",
            "exec",
            "--allow",
            "mcp",
        ])
        .assert()
        .success();
    assert!(fx.read(".botpack/trust.toml").contains("@acme/mcp-pack@0.3.0"));

    fx.command().args(["sync", "claude"]).assert().success();
    let mcp = fx.read(".claude/mcp.json");
    assert!(mcp.contains("@acme/mcp-pack/postgres"));
    assert!(mcp.contains("npx"));
    assert!(mcp.ends_with('\n'));
}

/// A recorded deny omits the server instead of blocking the sync.
#[test]
fn test_recorded_deny_omits_server() {
    let fx = fixture_with_mcp_package();

    fx.command()
        .args(["trust", "@acme/mcp-pack@0.3.0", "--deny", "exec", "--deny", "mcp"])
        .assert()
        .success();

    fx.command()
        .args(["sync", "claude"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gated"));
    let mcp = fx.read(".claude/mcp.json");
    assert!(!mcp.contains("postgres"));
}

/// Emitted servers are ordered by fqid.
#[test]
fn test_mcp_output_sorted_by_fqid() {
    let fx = TestFixture::new().with_manifest(manifests::NO_AUTOSYNC);
    for (dir, name) in [("pkg-z", "@zeta/pack"), ("pkg-a", "@alpha/pack")] {
        let pkg = fx.make_package_with(
            dir,
            name,
            "1.0.0",
            "s",
            "[capabilities]\nexec = true\nmcp = true\n",
        );
        std::fs::create_dir_all(pkg.join("mcp")).unwrap();
        std::fs::write(
            pkg.join("mcp/servers.toml"),
            "version = 1\n[[server]]\nid = \"srv\"\ncommand = \"run\"\n",
        )
        .unwrap();
        fx.append_manifest(&format!(
            "\n[dependencies]\n\"{name}\" = {{ path = \"{}\" }}\n",
            pkg.display()
        ));
    }
    fx.command().arg("install").assert().success();
    for key in ["@zeta/pack@1.0.0", "@alpha/pack@1.0.0"] {
        fx.command()
            .args(["trust", key, "--allow", "exec", "--allow", "mcp"])
            .assert()
            .success();
    }

    fx.command().args(["sync", "claude"]).assert().success();
    let mcp = fx.read(".claude/mcp.json");
    let alpha = mcp.find("@alpha/pack/srv").unwrap();
    let zeta = mcp.find("@zeta/pack/srv").unwrap();
    assert!(alpha < zeta);
}

/// Workspace-local servers are gated under the reserved workspace key.
#[test]
fn test_workspace_servers_gated() {
    let fx = TestFixture::new()
        .with_manifest(manifests::NO_AUTOSYNC)
        .with_file("assets/mcp/servers.toml", SERVERS_TOML);
    fx.command().arg("install").assert().success();

    fx.command().args(["sync", "claude"]).assert().failure().code(6);

    fx.command()
        .args(["trust", "__workspace__", "--allow", "exec", "--allow", "mcp"])
        .assert()
        .success();
    fx.command().args(["sync", "claude"]).assert().success();
    assert!(fx.read(".claude/mcp.json").contains("workspace/postgres"));
}

/// Audit lists untrusted capability-bearing packages and exits 6.
#[test]
fn test_audit_reports_untrusted() {
    let fx = fixture_with_mcp_package();

    fx.command()
        .arg("audit")
        .assert()
        .failure()
        .code(6)
        .stdout(predicate::str::contains("@acme/mcp-pack@0.3.0"));

    fx.command()
        .args([
            "trust",
            "@acme/mcp-pack@0.3.0",
            "--allow",
            "exec",
            "--allow",
            "mcp",
        ])
        .assert()
        .success();
    fx.command().arg("audit").assert().success();
}

/// A trust digest pin only matches the pinned content.
#[test]
fn test_trust_digest_pin() {
    let fx = fixture_with_mcp_package();

    fx.command()
        .args([
            "trust",
            "@acme/mcp-pack@0.3.0",
            "--allow",
            "exec",
            "--allow",
            "mcp",
            "--digest",
            "sha256:0000000000000000000000000000000000000000000000000000000000000000",
        ])
        .assert()
        .success();

    // The recorded digest does not match the installed content, so the
    // server stays out (recorded decision, not a block).
    fx.command().args(["sync", "claude"]).assert().success();
    assert!(!fx.read(".claude/mcp.json").contains("postgres"));
}

/// Revoking returns the package to the undecided state.
#[test]
fn test_trust_revoke() {
    let fx = fixture_with_mcp_package();
    fx.command()
        .args([
            "trust",
            "@acme/mcp-pack@0.3.0",
            "--allow",
            "exec",
            "--allow",
            "mcp",
        ])
        .assert()
        .success();
    fx.command().args(["sync", "claude"]).assert().success();

    fx.command()
        .args(["trust", "@acme/mcp-pack@0.3.0", "--revoke"])
        .assert()
        .success();
    // Force past the mcp.json rewrite check; the gate re-blocks.
    fx.command()
        .args(["sync", "claude", "--force"])
        .assert()
        .failure()
        .code(6);
}
