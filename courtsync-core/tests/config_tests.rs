//! Config error-message, validation and atomic-write integration tests.

use std::fs;

use courtsync_core::{config, Config, ConfigError};
use tempfile::TempDir;

fn write_raw(home: &TempDir, contents: &[u8]) {
    let dir = home.path().join(".courtsync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), contents).expect("write");
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_mentions_init() {
    let home = TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("config.yaml"));
    assert!(msg.contains("courtsync init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = TempDir::new().expect("tempdir");
    write_raw(&home, b": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_fills_defaults_for_missing_sync_section() {
    let home = TempDir::new().expect("tempdir");
    write_raw(&home, b"remote:\n  base_url: https://club.supabase.co\n");

    let cfg = config::load_at(home.path()).expect("load");
    assert!(cfg.sync.enabled);
    assert_eq!(cfg.sync.interval_secs, 300);
    assert_eq!(cfg.sync.request_timeout_secs, 30);
    assert_eq!(cfg.sync.probe_interval_secs, 15);
    assert!(cfg.sync.prune_remote_deletions);
    assert_eq!(cfg.remote.api_key, None);
}

#[test]
fn load_rejects_zero_interval() {
    let home = TempDir::new().expect("tempdir");
    write_raw(
        &home,
        b"remote:\n  base_url: https://club.supabase.co\nsync:\n  interval_secs: 0\n",
    );

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains("interval_secs"));
}

#[test]
fn save_rejects_non_http_url() {
    let home = TempDir::new().expect("tempdir");
    let err = config::save_at(home.path(), &Config::new("ftp://club")).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(!config::config_path_at(home.path()).exists());
}

// ---------------------------------------------------------------------------
// 2. Save / load
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_preserves_credentials() {
    let home = TempDir::new().expect("tempdir");
    let mut cfg = Config::new("https://club.supabase.co");
    cfg.remote.api_key = Some("anon-key".into());
    cfg.remote.access_token = Some("jwt".into());
    cfg.sync.interval_secs = 60;
    cfg.sync.enabled = false;

    config::save_at(home.path(), &cfg).expect("save");
    let back = config::load_at(home.path()).expect("load");
    assert_eq!(cfg, back);
}

#[cfg(unix)]
#[test]
fn saved_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let home = TempDir::new().expect("tempdir");
    config::save_at(home.path(), &Config::new("https://club.supabase.co")).expect("save");
    let mode = fs::metadata(config::config_path_at(home.path()))
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn overwrite_leaves_no_tmp_file() {
    let home = TempDir::new().expect("tempdir");
    config::save_at(home.path(), &Config::new("https://a.example")).expect("save");
    config::save_at(home.path(), &Config::new("https://b.example")).expect("save");

    let entries: Vec<_> = fs::read_dir(config::root_at(home.path()))
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["config.yaml".to_string()]);
}
