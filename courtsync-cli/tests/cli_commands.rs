use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use courtsync_core::config;
use courtsync_core::entity::{Entity, Player, SyncableEntity};
use courtsync_core::types::{EntityKind, SyncOperation};
use courtsync_daemon::EngineLock;
use courtsync_sync::{JsonFileSlot, JsonFileStore, LocalStore, PendingOperationQueue};

/// Nothing listens here, so every remote call is refused immediately.
const DEAD_REMOTE: &str = "http://127.0.0.1:1";

fn courtsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("courtsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn init(home: &Path) {
    courtsync_cmd(home)
        .args(["init", "--remote-url", DEAD_REMOTE, "--api-key", "anon"])
        .assert()
        .success();
}

fn seed_dirty_player(home: &Path) -> Entity {
    let store = JsonFileStore::open_at(home).expect("open store");
    let player: Entity = Player::new("Maya", "Okafor", "11").into();
    store.upsert(player.clone()).expect("seed player");
    player
}

fn status_json(home: &Path) -> serde_json::Value {
    let output = courtsync_cmd(home)
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(
        output.status.success(),
        "status failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("status JSON")
}

#[test]
fn init_writes_config_and_is_idempotent() {
    let home = TempDir::new().expect("home");

    courtsync_cmd(home.path())
        .args([
            "init",
            "--remote-url",
            "https://team.example.com",
            "--interval-secs",
            "120",
        ])
        .assert()
        .success()
        .stdout(contains("Wrote"));

    let written = config::load_at(home.path()).expect("config");
    assert_eq!(written.remote.base_url, "https://team.example.com");
    assert_eq!(written.sync.interval_secs, 120);
    assert!(written.sync.enabled);

    courtsync_cmd(home.path())
        .args(["init", "--remote-url", "https://other.example.com"])
        .assert()
        .success()
        .stdout(contains("already exists"));
    assert_eq!(
        config::load_at(home.path()).expect("config").remote.base_url,
        "https://team.example.com"
    );

    courtsync_cmd(home.path())
        .args(["init", "--remote-url", "https://other.example.com", "--force"])
        .assert()
        .success();
    assert_eq!(
        config::load_at(home.path()).expect("config").remote.base_url,
        "https://other.example.com"
    );
}

#[test]
fn init_rejects_non_http_url() {
    let home = TempDir::new().expect("home");
    courtsync_cmd(home.path())
        .args(["init", "--remote-url", "ftp://team.example.com"])
        .assert()
        .failure();
    assert!(!config::config_path_at(home.path()).exists());
}

#[test]
fn commands_without_config_point_at_init() {
    let home = TempDir::new().expect("home");
    courtsync_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("courtsync init"));
}

#[test]
fn offline_status_reports_unsynced_work() {
    let home = TempDir::new().expect("home");
    init(home.path());
    seed_dirty_player(home.path());

    let status = status_json(home.path());
    assert_eq!(status["running"], false);
    assert_eq!(status["enabled"], true);
    assert_eq!(status["dirty_entities"], 1);
    assert_eq!(status["pending_operations"], 0);
    assert_eq!(status["describe"], "never synced");

    courtsync_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("unsynced entities"))
        .stdout(contains("courtsync sync"));
}

#[test]
fn disable_and_enable_persist_without_daemon() {
    let home = TempDir::new().expect("home");
    init(home.path());

    courtsync_cmd(home.path())
        .arg("disable")
        .assert()
        .success()
        .stdout(contains("disabled"));
    assert!(!config::load_at(home.path()).expect("config").sync.enabled);
    assert_eq!(status_json(home.path())["enabled"], false);

    courtsync_cmd(home.path()).arg("enable").assert().success();
    assert!(config::load_at(home.path()).expect("config").sync.enabled);
}

#[test]
fn queue_lists_persisted_operations() {
    let home = TempDir::new().expect("home");
    init(home.path());

    courtsync_cmd(home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(contains("No pending operations"));

    let player = seed_dirty_player(home.path());
    let queue = PendingOperationQueue::load(JsonFileSlot::at(home.path()));
    queue.enqueue(SyncOperation::create(player.entity_ref()));
    drop(queue);

    courtsync_cmd(home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(contains("create"))
        .stdout(contains(player.id().to_string()));

    let output = courtsync_cmd(home.path())
        .args(["queue", "--json"])
        .output()
        .expect("run queue --json");
    let ops: Vec<SyncOperation> = serde_json::from_slice(&output.stdout).expect("queue JSON");
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, EntityKind::Player);
}

#[test]
fn local_sync_against_unreachable_remote_keeps_data_dirty() {
    let home = TempDir::new().expect("home");
    init(home.path());
    let player = seed_dirty_player(home.path());

    courtsync_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stdout(contains("sync failed"));

    let store = JsonFileStore::open_at(home.path()).expect("reopen store");
    let local = store
        .fetch_by_id(EntityKind::Player, player.id())
        .expect("read")
        .expect("player still present");
    assert!(local.is_dirty());
}

#[test]
fn local_sync_while_disabled_is_a_no_op() {
    let home = TempDir::new().expect("home");
    init(home.path());
    courtsync_cmd(home.path()).arg("disable").assert().success();

    courtsync_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("disabled"));
}

#[test]
fn local_sync_backs_off_while_another_process_holds_the_engine() {
    let home = TempDir::new().expect("home");
    init(home.path());
    let player = seed_dirty_player(home.path());
    let _held = EngineLock::acquire(home.path()).expect("take engine lock");

    courtsync_cmd(home.path())
        .args(["sync", "--json"])
        .assert()
        .success()
        .stdout(contains("already_running"));

    let store = JsonFileStore::open_at(home.path()).expect("reopen store");
    let local = store
        .fetch_by_id(EntityKind::Player, player.id())
        .expect("read")
        .expect("player still present");
    assert_eq!(local, player, "store must be untouched");
}
