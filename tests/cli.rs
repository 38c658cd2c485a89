use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cguard_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cguard");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let items_dir = root.join("items");
    fs::create_dir_all(&items_dir).unwrap();
    fs::write(
        items_dir.join("copy.json"),
        r#"{"id": "tg-100", "platform": "telegram", "modality": "text",
            "text_content": "Hello world", "content_url": "https://t.me/c/100"}"#,
    )
    .unwrap();
    fs::write(
        items_dir.join("batch.json"),
        r#"[{"id": "tg-200", "platform": "telegram", "modality": "text", "text_content": "one"},
            {"id": "tg-201", "platform": "telegram", "modality": "image",
             "media_urls": ["https://cdn.example.com/a.png"]}]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/cguard.sqlite"

[detection]
similarity_threshold = 0.8

[models.text]
name = "Default Text Model"
version = "1.0"

[dispatch]
workers = 2
max_attempts = 1
retry_delay_secs = 0
"#,
        root.display()
    );

    let config_path = config_dir.join("cguard.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cguard(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cguard_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cguard binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn init(config_path: &Path) {
    let (stdout, stderr, success) = run_cguard(config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
}

fn add_hello_world(config_path: &Path) -> String {
    let (stdout, stderr, success) = run_cguard(
        config_path,
        &[
            "catalog", "add", "--user", "u1", "--title", "Greeting", "--modality", "text",
            "--text", "Hello world",
        ],
    );
    assert!(success, "catalog add failed: {}", stderr);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("id: "))
        .expect("catalog add prints the id")
        .to_string()
}

fn items_path(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("items")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cguard(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cguard(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cguard(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_catalog_add_and_list() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    let id = add_hello_world(&config_path);

    let (stdout, _, success) = run_cguard(&config_path, &["catalog", "list", "--user", "u1"]);
    assert!(success);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("Greeting"));

    let (stdout, _, success) = run_cguard(&config_path, &["catalog", "get", &id]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["modality"], "text");
    assert!(json["text_fingerprint"]["hash"].is_string());
}

#[test]
fn test_catalog_add_requires_content() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) = run_cguard(
        &config_path,
        &["catalog", "add", "--user", "u1", "--title", "Empty", "--modality", "image"],
    );
    assert!(!success);
    assert!(stderr.contains("text_content"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_modality_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) = run_cguard(
        &config_path,
        &[
            "catalog", "add", "--user", "u1", "--title", "Song", "--modality", "audio", "--text",
            "la la",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("unknown modality"), "stderr: {}", stderr);
}

#[test]
fn test_item_add_with_detection_finds_exact_copy() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    let protected_id = add_hello_world(&config_path);

    let (stdout, stderr, success) = run_cguard(
        &config_path,
        &[
            "item",
            "add",
            &items_path(&config_path, "copy.json"),
            "--detect",
            "--user",
            "u1",
        ],
    );
    assert!(success, "item add failed: {}", stderr);
    assert!(stdout.contains("completed (matches: 1, high confidence: 1)"), "stdout: {}", stdout);

    let (stdout, _, success) = run_cguard(&config_path, &["matches", "list", "--user", "u1"]);
    assert!(success);
    assert!(stdout.contains("exact"));
    assert!(stdout.contains(&protected_id));
    assert!(stdout.contains("1 match"));
}

#[test]
fn test_review_workflow() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    add_hello_world(&config_path);
    let (_, stderr, success) = run_cguard(
        &config_path,
        &["item", "add", &items_path(&config_path, "copy.json"), "--detect", "--user", "u1"],
    );
    assert!(success, "item add failed: {}", stderr);

    let (stdout, _, _) = run_cguard(&config_path, &["matches", "list", "--unreviewed"]);
    let match_id = stdout
        .lines()
        .nth(1)
        .and_then(|l| l.split_whitespace().next())
        .expect("one match row")
        .to_string();

    let (stdout, stderr, success) = run_cguard(
        &config_path,
        &[
            "matches", "review", &match_id, "--reviewer", "alice", "--confirm", "--action",
            "takedown",
        ],
    );
    assert!(success, "review failed: {}", stderr);
    assert!(stdout.contains("review: confirmed"));

    let (stdout, _, _) = run_cguard(&config_path, &["matches", "list", "--unreviewed"]);
    assert!(stdout.contains("No matches."));

    let (stdout, _, success) = run_cguard(&config_path, &["matches", "get", &match_id]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["is_reviewed"], true);
    assert_eq!(json["is_confirmed"], true);
    assert_eq!(json["reviewed_by"], "alice");
    assert_eq!(json["action_taken"], "takedown");
}

#[test]
fn test_review_missing_match_errors() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, _, success) = run_cguard(
        &config_path,
        &["matches", "review", "nope", "--reviewer", "alice", "--reject"],
    );
    assert!(!success);
}

#[test]
fn test_submit_then_drain() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    add_hello_world(&config_path);

    let (_, stderr, success) =
        run_cguard(&config_path, &["item", "add", &items_path(&config_path, "batch.json")]);
    assert!(success, "item add failed: {}", stderr);

    for item in ["tg-200", "tg-201"] {
        let (stdout, stderr, success) =
            run_cguard(&config_path, &["detect", "submit", item, "--user", "u1"]);
        assert!(success, "submit failed: {}", stderr);
        assert!(stdout.contains("status: pending"));
    }

    let (stdout, _, success) =
        run_cguard(&config_path, &["jobs", "list", "--status", "pending"]);
    assert!(success);
    assert!(stdout.contains("pending"));

    let (stdout, stderr, success) = run_cguard(&config_path, &["detect", "drain"]);
    assert!(success, "drain failed: {}", stderr);
    assert!(stdout.contains("completed: 2"), "stdout: {}", stdout);

    let (stdout, _, _) = run_cguard(&config_path, &["detect", "drain"]);
    assert!(stdout.contains("No pending jobs."));
}

#[test]
fn test_submit_unknown_item_errors() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) =
        run_cguard(&config_path, &["detect", "submit", "missing", "--user", "u1"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_judge_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) = run_cguard(
        &config_path,
        &["judge", "--owner", "a", "--candidate", "b"],
    );
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    add_hello_world(&config_path);
    run_cguard(
        &config_path,
        &["item", "add", &items_path(&config_path, "copy.json"), "--detect", "--user", "u1"],
    );

    let (stdout, stderr, success) = run_cguard(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Protected:   1 (1 monitored)"));
    assert!(stdout.contains("Matches:     1 (1 awaiting review)"));
    assert!(stdout.contains("completed"));
}
