// tests/config_env.rs
//
// Env overrides on top of the TOML/default configuration. Serialized
// because std::env is process-global.

use serial_test::serial;
use video_scout::config::{AppConfig, ENV_BIND_ADDR, ENV_CONFIG_PATH, ENV_DAILY_QUOTA};

fn clear_env() {
    std::env::remove_var(ENV_CONFIG_PATH);
    std::env::remove_var(ENV_DAILY_QUOTA);
    std::env::remove_var(ENV_BIND_ADDR);
}

#[serial]
#[test]
fn defaults_apply_without_any_env_or_file() {
    clear_env();
    // Point at an isolated directory so a repo-level config cannot leak in.
    let tmp = tempfile::tempdir().unwrap();
    let old = std::env::current_dir().unwrap();
    std::env::set_current_dir(tmp.path()).unwrap();

    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.quota.daily_limit, 10_000);
    assert_eq!(cfg.server.bind_addr, "0.0.0.0:8000");

    std::env::set_current_dir(&old).unwrap();
}

#[serial]
#[test]
fn env_overrides_beat_file_values() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("video_scout.toml");
    std::fs::write(
        &path,
        r#"
[quota]
daily_limit = 4000

[server]
bind_addr = "127.0.0.1:9999"
"#,
    )
    .unwrap();

    std::env::set_var(ENV_CONFIG_PATH, path.display().to_string());
    std::env::set_var(ENV_DAILY_QUOTA, "2500");

    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.quota.daily_limit, 2_500, "env beats the file");
    assert_eq!(cfg.server.bind_addr, "127.0.0.1:9999", "file beats defaults");

    clear_env();
}

#[serial]
#[test]
fn malformed_env_numbers_are_ignored() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let old = std::env::current_dir().unwrap();
    std::env::set_current_dir(tmp.path()).unwrap();

    std::env::set_var(ENV_DAILY_QUOTA, "not-a-number");
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.quota.daily_limit, 10_000);

    clear_env();
    std::env::set_current_dir(&old).unwrap();
}
