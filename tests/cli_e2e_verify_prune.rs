//! End-to-end tests for `botpack verify` (S3) and `botpack prune`.

mod common;

use common::{manifests, TestFixture};
use predicates::prelude::*;
use walkdir::WalkDir;

fn fixture_with_installed_package() -> TestFixture {
    let fx = TestFixture::new().with_manifest(manifests::NO_AUTOSYNC);
    let pkg = fx.make_package("pkg-b", "@acme/base", "1.2.0", "util");
    fx.append_manifest(&format!(
        "\n[dependencies]\nbase = {{ path = \"{}\" }}\n",
        pkg.display()
    ));
    fx.command().arg("install").assert().success();
    fx
}

#[test]
fn test_verify_passes_on_fresh_install() {
    let fx = fixture_with_installed_package();
    fx.command()
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("verified 1 package"));
}

/// S3: tampering with a store payload makes verify exit 4 and name the
/// package plus the expected and actual digests.
#[test]
fn test_verify_detects_tampering() {
    let fx = fixture_with_installed_package();

    // Flip a byte in the stored payload.
    let payload_file = WalkDir::new(fx.store_dir())
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name() == "SKILL.md" && e.path().to_string_lossy().contains("payload"))
        .expect("stored SKILL.md")
        .path()
        .to_path_buf();
    std::fs::write(&payload_file, "tampered").unwrap();

    fx.command()
        .arg("verify")
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("@acme/base@1.2.0"))
        .stderr(predicate::str::contains("expected sha256:"))
        .stderr(predicate::str::contains("actual sha256:"));
}

#[test]
fn test_verify_detects_missing_entry() {
    let fx = fixture_with_installed_package();

    // Remove the whole store entry.
    let entry = std::fs::read_dir(fx.store_dir().join("v1"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    std::fs::remove_dir_all(entry).unwrap();

    fx.command().arg("verify").assert().failure().code(4);
}

/// Prune removes unreferenced entries only and reports reclaimed bytes.
#[test]
fn test_prune_removes_unreferenced_only() {
    let fx = fixture_with_installed_package();

    // Install a second package, then drop it from the manifest so its
    // store entry becomes unreferenced.
    let extra = fx.make_package("pkg-extra", "@acme/extra", "0.1.0", "tool");
    fx.command()
        .args(["add", "extra", "--path"])
        .arg(extra.as_os_str())
        .assert()
        .success();
    fx.command().args(["remove", "extra"]).assert().success();

    fx.command()
        .args(["prune", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would remove 1"));

    fx.command()
        .arg("prune")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1"));

    // The surviving entry still verifies.
    fx.command().arg("verify").assert().success();

    // Pruning again finds nothing.
    fx.command()
        .arg("prune")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0"));
}

#[test]
fn test_verify_without_lockfile_is_parse_error() {
    let fx = TestFixture::new().with_manifest(manifests::EMPTY);
    fx.command().arg("verify").assert().failure().code(2);
}

/// Frame one JSON-RPC body the way an MCP stdio server writes it.
#[cfg(unix)]
fn frame(body: &str) -> String {
    format!(
        "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

/// Escape a string for a TOML basic ("...") string.
#[cfg(unix)]
fn toml_escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\\' => "\\\\".to_string(),
            '"' => "\\\"".to_string(),
            '\r' => "\\r".to_string(),
            '\n' => "\\n".to_string(),
            c => c.to_string(),
        })
        .collect()
}

/// Install a package whose servers.toml launches a canned shell responder
/// that answers the whole smoke handshake.
#[cfg(unix)]
fn fixture_with_smokeable_server() -> TestFixture {
    let fx = TestFixture::new().with_manifest(manifests::NO_AUTOSYNC);
    let pkg = fx.make_package_with(
        "pkg-mcp",
        "@acme/mcp-pack",
        "0.3.0",
        "db_helper",
        "[capabilities]\nexec = true\nmcp = true\n",
    );

    let mut frames = String::new();
    frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#));
    frames.push_str(&frame(
        r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"magic_number"}]}}"#,
    ));
    frames.push_str(&frame(r#"{"jsonrpc":"2.0","id":3,"result":{"resources":[]}}"#));
    // The responder dumps the canned frames, then swallows stdin so the
    // client's writes never hit a closed pipe.
    std::fs::write(pkg.join("frames.bin"), frames).unwrap();
    let script = "cat frames.bin; cat >/dev/null";

    std::fs::create_dir_all(pkg.join("mcp")).unwrap();
    std::fs::write(
        pkg.join("mcp/servers.toml"),
        format!(
            "version = 1\n\n[[server]]\nid = \"fake\"\ncommand = \"sh\"\nargs = [\"-c\", \"{}\"]\n",
            toml_escape(script)
        ),
    )
    .unwrap();

    fx.append_manifest(&format!(
        "\n[dependencies]\n\"@acme/mcp-pack\" = {{ path = \"{}\" }}\n",
        pkg.display()
    ));
    fx.command().arg("install").assert().success();
    fx
}

/// `verify --smoke` launches a trust-allowed stdio server and reports its
/// tool count.
#[cfg(unix)]
#[test]
fn test_verify_smoke_runs_allowed_server() {
    let fx = fixture_with_smokeable_server();
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

    fx.command()
        .args(["verify", "--smoke"])
        .assert()
        .success()
        .stdout(predicate::str::contains("smoke @acme/mcp-pack/fake: ok (1 tool(s)"));
}

/// Without a recorded allow, the server is skipped and never launched; the
/// digest verification still passes.
#[cfg(unix)]
#[test]
fn test_verify_smoke_skips_untrusted_server() {
    let fx = fixture_with_smokeable_server();
    fx.command()
        .args(["verify", "--smoke"])
        .assert()
        .success()
        .stdout(predicate::str::contains("smoke skipped"))
        .stdout(predicate::str::contains("not trusted for exec"));
}

/// A server that fails to launch makes `verify --smoke` fail.
#[cfg(unix)]
#[test]
fn test_verify_smoke_reports_launch_failure() {
    let fx = TestFixture::new().with_manifest(manifests::NO_AUTOSYNC);
    let pkg = fx.make_package_with(
        "pkg-mcp",
        "@acme/mcp-pack",
        "0.3.0",
        "db_helper",
        "[capabilities]\nexec = true\nmcp = true\n",
    );
    std::fs::create_dir_all(pkg.join("mcp")).unwrap();
    std::fs::write(
        pkg.join("mcp/servers.toml"),
        "version = 1\n\n[[server]]\nid = \"broken\"\ncommand = \"botpack-no-such-binary-xyz\"\n",
    )
    .unwrap();
    fx.append_manifest(&format!(
        "\n[dependencies]\n\"@acme/mcp-pack\" = {{ path = \"{}\" }}\n",
        pkg.display()
    ));
    fx.command().arg("install").assert().success();
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

    fx.command()
        .args(["verify", "--smoke"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("smoke failed"));
}
