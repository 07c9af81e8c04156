use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn testgen_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("testgen");
    path
}

fn setup_test_env(generation: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("documents");
    fs::create_dir_all(docs_dir.join("drafts")).unwrap();
    fs::write(
        docs_dir.join("login_api.md"),
        "# Login\n\nInvalid credentials return 401.\n\n# Lockout\n\nFive failed attempts lock the account.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("reports.md"),
        "# Reports\n\nMonthly reports can be exported as CSV.",
    )
    .unwrap();
    fs::write(docs_dir.join("drafts/wip.md"), "# WIP\n\nNot ready.").unwrap();

    let config_content = format!(
        r#"[documents]
root = "{}/documents"
include_globs = ["**/*.md"]
exclude_globs = ["drafts/**"]

[chunking]
max_tokens = 100
overlap_tokens = 10

[embedding]
provider = "hash"
dims = 64

[generation]
provider = "{}"

[storage]
mode = "memory"

[server]
bind = "127.0.0.1:0"

[logging]
level = "warn"
"#,
        root.display(),
        generation
    );

    let config_path = config_dir.join("testgen.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_testgen(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = testgen_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run testgen binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_succeeds_and_is_idempotent() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, stderr, success) = run_testgen(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("storage: memory"));
    assert!(stdout.contains("ok"));

    let (_, _, success) = run_testgen(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_documents() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, stderr, success) = run_testgen(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("new: 2"), "got: {}", stdout);
    assert!(stdout.contains("documents ingested: 2"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_dry_run() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, _, success) = run_testgen(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("new: 2"));
    assert!(stdout.contains("estimated chunks: 3"), "got: {}", stdout);
}

#[test]
fn test_search_finds_login_api() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, stderr, success) =
        run_testgen(&config_path, &["search", "invalid credentials", "--k", "1"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. [Vector"), "got: {}", stdout);
    assert!(first.contains("login_api.md"), "got: {}", stdout);
}

#[test]
fn test_search_without_embeddings_uses_keyword_search() {
    let (tmp, config_path) = setup_test_env("disabled");
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("provider = \"hash\"\ndims = 64", "provider = \"disabled\"");
    let keyword_only = tmp.path().join("config/keyword.toml");
    fs::write(&keyword_only, content).unwrap();

    let (stdout, stderr, success) =
        run_testgen(&keyword_only, &["search", "invalid credentials", "--k", "1"]);
    assert!(success, "search failed: {}", stderr);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("(degraded: keyword search)"), "got: {}", stdout);
    let first = lines.next().unwrap_or_default();
    assert!(first.starts_with("1. [Keyword"), "got: {}", stdout);
    assert!(first.contains("login_api.md"), "got: {}", stdout);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, _, success) = run_testgen(&config_path, &["search", "  "]);
    assert!(success, "Empty query should not fail");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_generate_with_disabled_provider_fails() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, stderr, success) = run_testgen(&config_path, &["generate", "login lockout"]);
    assert!(!success, "generate should fail: {}", stdout);
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_generate_empty_query_fails() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (_, stderr, success) = run_testgen(&config_path, &["generate", ""]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"));
}

#[test]
fn test_verify_reports_each_dependency() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, _, success) = run_testgen(&config_path, &["verify"]);
    assert!(!success, "verify should exit non-zero when a check fails");
    assert!(stdout.contains("PASS graph"));
    assert!(stdout.contains("PASS vectors"));
    assert!(stdout.contains("PASS embedding"));
    assert!(stdout.contains("FAIL generation"));
    assert!(stdout.contains("3/4 checks passed"));
}

#[test]
fn test_status_and_reset_in_memory_mode() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, _, success) = run_testgen(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("tracked documents: 0"));
    assert!(stdout.contains("storage: memory"));

    let (stdout, _, success) = run_testgen(&config_path, &["reset"]);
    assert!(success);
    assert!(stdout.contains("forgotten documents: 0"));
}

#[test]
fn test_contradictory_storage_config_is_rejected() {
    let (tmp, config_path) = setup_test_env("disabled");
    let content = fs::read_to_string(&config_path).unwrap();
    let content = content.replace(
        "[server]",
        "[storage.graph]\nkind = \"local\"\nurl = \"http://localhost:7474\"\n\n[server]",
    );
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, content).unwrap();

    let (_, stderr, success) = run_testgen(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("storage.mode"), "got: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let (_, stderr, success) = run_testgen(Path::new("/nonexistent/testgen.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
