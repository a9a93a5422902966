use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use carryover::config::load_config;
use carryover::db;
use carryover::sqlite_store::SqliteStore;
use carryover_core::models::StoredEntity;
use carryover_core::store::EntityStore;

fn carryover_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("carryover");
    path
}

const SOURCE_V1: &str = r#"{
  "Topic 1: Climate": [
    { "question_id": "Q1", "question": "What is the greenhouse effect?", "answer": "Trapping of heat by gases.", "type": "qa" },
    { "question_id": "Q2", "question": "Name a major greenhouse gas.", "answer": "Carbon dioxide." },
    { "question_id": "Q3", "question": "What does CCS stand for?", "answer": "Carbon capture and storage." }
  ],
  "Topic 2: Energy": [
    { "question_id": "Q1", "question": "What is a heat pump?", "answer": "A device moving heat." }
  ]
}"#;

/// V1 with one question reworded, one dropped, and one added.
const SOURCE_V2: &str = r#"{
  "Topic 1: Climate": [
    { "question_id": "Q1", "question": "What is the greenhouse effect?", "answer": "Trapping of heat by gases." },
    { "question_id": "Q2", "question": "Name one major greenhouse gas.", "answer": "Carbon dioxide (CO2)." },
    { "question_id": "Q4", "question": "Why do ice sheets matter for sea level rise?", "answer": "They hold most land ice." }
  ],
  "Topic 2: Energy": [
    { "question_id": "Q1", "question": "What is a heat pump?", "answer": "A device moving heat." }
  ]
}"#;

fn setup_test_env(extra_config: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("rebuilt.json"), SOURCE_V1).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/cards.sqlite3"

[collections]
primary = "cards"
mirrors = ["cardbank"]

[matching]
force_leftovers = false

[source]
path = "{root}/rebuilt.json"
{extra_config}
"#,
        root = root.display(),
        extra_config = extra_config
    );

    let config_path = config_dir.join("carryover.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn write_source(tmp: &TempDir, content: &str) {
    fs::write(tmp.path().join("rebuilt.json"), content).unwrap();
}

fn run_carryover(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = carryover_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run carryover binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

async fn read_group(config_path: &Path, collection: &str, group: &str) -> Vec<StoredEntity> {
    let cfg = load_config(config_path).unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let store = SqliteStore::new(pool.clone(), cfg.layout.clone());
    let entities = store.list_by_group(collection, group).await.unwrap();
    pool.close().await;
    entities
}

fn find<'a>(entities: &'a [StoredEntity], prompt: &str) -> &'a StoredEntity {
    entities
        .iter()
        .find(|e| e.content.primary == prompt)
        .unwrap_or_else(|| panic!("no entity with prompt {:?}", prompt))
}

fn backups(tmp: &TempDir) -> usize {
    fs::read_dir(tmp.path().join("data"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".backup_before_sync_"))
        .count()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_carryover(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, success1) = run_carryover(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_carryover(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[tokio::test]
async fn test_first_sync_inserts_everything() {
    let (tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    let (stdout, stderr, success) = run_carryover(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("mutations: updated=0 inserted=4 deleted=0"), "{}", stdout);
    assert!(stdout.contains("Topic 1: Climate: 3"), "{}", stdout);
    assert!(stdout.contains("ok"));
    assert_eq!(backups(&tmp), 1);

    let cards = read_group(&config_path, "cards", "Topic 1: Climate").await;
    let mirror = read_group(&config_path, "cardbank", "Topic 1: Climate").await;
    assert_eq!(cards.len(), 3);
    assert_eq!(cards, mirror);

    let first = find(&cards, "What is the greenhouse effect?");
    assert_eq!(first.metadata["type"], "qa");
    assert!(first.metadata.contains_key("createdAt"));
    assert!(first.metadata["meta"].get("updatedAt").is_some());
}

#[test]
fn test_resync_is_a_no_op() {
    let (tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    let (_, _, first) = run_carryover(&config_path, &["sync"]);
    assert!(first);

    let (stdout, stderr, success) = run_carryover(&config_path, &["sync"]);
    assert!(success, "second sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("mutations: updated=0 inserted=0 deleted=0"), "{}", stdout);
    // Nothing to write, nothing to back up.
    assert_eq!(backups(&tmp), 1);
}

#[tokio::test]
async fn test_reworded_question_keeps_its_id() {
    let (tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    run_carryover(&config_path, &["sync", "--no-backup"]);
    let before = read_group(&config_path, "cards", "Topic 1: Climate").await;
    let gas_id = find(&before, "Name a major greenhouse gas.").id.clone();
    let effect_id = find(&before, "What is the greenhouse effect?").id.clone();
    let ccs_id = find(&before, "What does CCS stand for?").id.clone();

    write_source(&tmp, SOURCE_V2);
    let (stdout, stderr, success) = run_carryover(&config_path, &["sync", "--no-backup"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("mutations: updated=1 inserted=1 deleted=1"), "{}", stdout);
    assert_eq!(backups(&tmp), 0);

    let after = read_group(&config_path, "cards", "Topic 1: Climate").await;
    assert_eq!(after.len(), 3);
    let gas = find(&after, "Name one major greenhouse gas.");
    assert_eq!(gas.id, gas_id);
    assert_eq!(gas.content.secondary, "Carbon dioxide (CO2).");
    assert_eq!(find(&after, "What is the greenhouse effect?").id, effect_id);
    assert!(after.iter().all(|e| e.id != ccs_id));

    let mirror = read_group(&config_path, "cardbank", "Topic 1: Climate").await;
    assert_eq!(after, mirror);
}

#[test]
fn test_plan_writes_nothing_and_reports_digest() {
    let (tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    run_carryover(&config_path, &["sync", "--no-backup"]);
    write_source(&tmp, SOURCE_V2);

    let (stdout, stderr, success) = run_carryover(&config_path, &["plan", "--json"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let digest = report["digest"].as_str().unwrap().to_string();
    assert_eq!(digest.len(), 64);
    let climate = report["groups"]
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["group_key"] == "Topic 1: Climate")
        .unwrap();
    assert_eq!(climate["updated"], 1);
    assert_eq!(climate["inserted"], 1);
    assert_eq!(climate["deleted"], 1);

    // Planning again over the unchanged store gives the same digest.
    let (stdout2, _, _) = run_carryover(&config_path, &["plan", "--json"]);
    let report2: serde_json::Value = serde_json::from_str(&stdout2).unwrap();
    assert_eq!(report2["digest"], digest.as_str());

    let (stdout, _, success) = run_carryover(&config_path, &["sync", "--no-backup", "--expect-digest", "deadbeef"]);
    assert!(!success, "sync with a stale digest must fail: {}", stdout);

    let (stdout, stderr, success) = run_carryover(&config_path, &["sync", "--no-backup", "--expect-digest", &digest]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("mutations: updated=1 inserted=1 deleted=1"), "{}", stdout);
}

#[test]
fn test_plan_human_output() {
    let (_tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    let (stdout, stderr, success) = run_carryover(&config_path, &["plan"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("Topic 2: Energy: existing=0 incoming=1"), "{}", stdout);
    assert!(stdout.contains("total: update=0 insert=4 delete=0"), "{}", stdout);
    assert!(stdout.contains("digest: "));
}

#[tokio::test]
async fn test_unmapped_label_fails_but_mapped_groups_apply() {
    let (_tmp, config_path) = setup_test_env(
        r#"
[groups]
"Topic 1: Climate" = "climate"
"#,
    );

    run_carryover(&config_path, &["init"]);
    let (stdout, stderr, success) = run_carryover(&config_path, &["sync", "--no-backup"]);
    assert!(!success, "unmapped label must fail the run: {}", stdout);
    assert!(stdout.contains("failed: group 'Topic 2: Energy' not found"), "{}", stdout);
    assert!(stderr.contains("not applied"), "{}", stderr);

    let climate = read_group(&config_path, "cards", "climate").await;
    assert_eq!(climate.len(), 3);
    assert!(climate.iter().all(|e| e.group_key == "climate"));
}

#[tokio::test]
async fn test_missing_configured_group_aborts_before_writing() {
    let (_tmp, config_path) = setup_test_env(
        r#"
[groups]
"Topic 1: Climate" = "climate"
"Topic 2: Energy" = "energy"
"Topic 3: Policy" = "policy"
"#,
    );

    run_carryover(&config_path, &["init"]);
    let (stdout, stderr, success) = run_carryover(&config_path, &["sync"]);
    assert!(!success, "missing group must abort: {}", stdout);
    assert!(stderr.contains("Topic 3: Policy"), "{}", stderr);
    assert!(read_group(&config_path, "cards", "climate").await.is_empty());
}

#[tokio::test]
async fn test_group_absent_from_source_is_reported_untouched() {
    let (tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    run_carryover(&config_path, &["sync", "--no-backup"]);
    write_source(
        &tmp,
        r#"{ "Topic 1: Climate": [
            { "question_id": "Q1", "question": "What is the greenhouse effect?", "answer": "Trapping of heat by gases." }
        ] }"#,
    );

    let (stdout, stderr, success) = run_carryover(&config_path, &["plan"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("untouched: Topic 2: Energy (1 stored, absent from source)"),
        "{}",
        stdout
    );

    let (stdout, _, success) = run_carryover(&config_path, &["plan", "--json"]);
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["untouched"][0]["group_key"], "Topic 2: Energy");
    assert_eq!(report["untouched"][0]["stored"], 1);

    let (stdout, stderr, success) = run_carryover(&config_path, &["sync", "--no-backup"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("untouched: Topic 2: Energy"), "{}", stdout);
    assert_eq!(read_group(&config_path, "cards", "Topic 2: Energy").await.len(), 1);
}

#[tokio::test]
async fn test_flat_card_without_topic_is_reported_malformed() {
    let (tmp, config_path) = setup_test_env("");
    write_source(
        &tmp,
        r#"{ "cards": [
            { "topic": "A", "question": "First?", "answer": "x" },
            { "topic": "B", "question": "Second?", "answer": "y" },
            { "question": "no topic here", "answer": "z" }
        ] }"#,
    );

    run_carryover(&config_path, &["init"]);
    let (stdout, stderr, success) = run_carryover(&config_path, &["plan"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("malformed cards#2: missing 'topic'"), "{}", stdout);
    assert!(!stdout.contains("  cards: existing="), "{}", stdout);

    let (stdout, stderr, success) = run_carryover(&config_path, &["sync", "--no-backup"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("malformed cards#2: missing 'topic'"), "{}", stdout);
    assert_eq!(read_group(&config_path, "cards", "A").await.len(), 1);
    assert_eq!(read_group(&config_path, "cards", "B").await.len(), 1);
    assert!(read_group(&config_path, "cards", "cards").await.is_empty());
}

#[test]
fn test_require_existing_template_skips_empty_group() {
    let (_tmp, config_path) = setup_test_env("\n[template]\nrequire_existing = true\n");

    run_carryover(&config_path, &["init"]);
    let (stdout, _, success) = run_carryover(&config_path, &["plan"]);
    assert!(!success);
    assert!(stdout.contains("no existing entity to derive metadata from"), "{}", stdout);
}

#[test]
fn test_stats_lists_groups() {
    let (_tmp, config_path) = setup_test_env("");

    run_carryover(&config_path, &["init"]);
    run_carryover(&config_path, &["sync", "--no-backup"]);
    let (stdout, stderr, success) = run_carryover(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("cards:"));
    assert!(stdout.contains("cardbank:"));
    assert!(stdout.contains("Topic 1: Climate"));
    assert!(stdout.contains("Topic 2: Energy"));
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_carryover(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
