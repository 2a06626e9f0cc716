use std::{env, fs, path::PathBuf};

use ambassador_policy::PolicyOrigin;
use ambassador_server::config::loader::load_config;

// Environment variables are process-wide, so every env-dependent check lives
// in this one test.
#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("ambassador.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081

[logging]
level = "debug"

[policy]
path = "/etc/ambassador/policy.json"
cache_capacity = 64
watch = false
debounce_ms = 250
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.policy.cache_capacity, 64);
    assert!(!cfg.policy.watch);
    assert_eq!(cfg.policy.reload_retry_attempts, 3);
    assert_eq!(
        cfg.policy_origin(),
        PolicyOrigin::File(PathBuf::from("/etc/ambassador/policy.json"))
    );
    assert_eq!(cfg.watcher_config().debounce.as_millis(), 250);

    // 2) Prefixed env override should win over file
    unsafe {
        env::set_var("AMBASSADOR__SERVER__PORT", "9090");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9090);

    // 3) LISTEN_PORT wins over both
    unsafe {
        env::set_var("LISTEN_PORT", "3000");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with LISTEN_PORT");
    assert_eq!(cfg_env.server.port, 3000);

    // Out-of-range values are ignored
    unsafe {
        env::set_var("LISTEN_PORT", "99999");
    }
    let cfg_env = load_config(path.to_str()).expect("invalid LISTEN_PORT is ignored");
    assert_eq!(cfg_env.server.port, 9090);

    unsafe {
        env::remove_var("AMBASSADOR__SERVER__PORT");
        env::remove_var("LISTEN_PORT");
    }

    // 4) AUTH_TOKENS_PATH wins over the file setting and AUTH_TOKENS
    unsafe {
        env::set_var("AUTH_TOKENS", "[]");
        env::set_var("AUTH_TOKENS_PATH", "/run/policy.json");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with legacy env");
    assert_eq!(
        cfg_env.policy_origin(),
        PolicyOrigin::File(PathBuf::from("/run/policy.json"))
    );
    unsafe {
        env::remove_var("AUTH_TOKENS_PATH");
    }

    // 5) Without any file AUTH_TOKENS becomes the inline policy
    let missing = dir.path().join("missing.toml");
    let cfg_env = load_config(missing.to_str()).expect("missing file falls back to defaults");
    assert_eq!(cfg_env.server.port, 8080);
    assert_eq!(cfg_env.policy_origin(), PolicyOrigin::Inline("[]".into()));
    unsafe {
        env::remove_var("AUTH_TOKENS");
    }

    // 6) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[logging]
level = "loud"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("logging.level"));

    let invalid_toml = r#"
[policy]
reload_retry_attempts = 0
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("reload_retry_attempts"));
}
