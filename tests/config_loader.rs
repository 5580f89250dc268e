use std::path::PathBuf;

use runbox::config::{Config, ConfigError, ConfigStore};
use runbox::session::SessionSettings;

/// Test that Config::default() produces the documented values.
#[test]
fn test_config_default_values() {
    let config = Config::default();

    assert_eq!(config.server.bind_addr, "0.0.0.0:10010");
    assert_eq!(config.server.shutdown_timeout_seconds, 10);

    assert_eq!(config.sessions.max_sessions, 1024);
    assert_eq!(config.sessions.grace_period_seconds, 30);
    assert_eq!(config.sessions.input_grace_ms, 200);
    assert_eq!(config.sessions.read_chunk_bytes, 8192);
    assert_eq!(config.sessions.prompt_marker, "(gdb) ");

    assert_eq!(config.toolchain.gcc, "gcc");
    assert_eq!(config.toolchain.clangxx, "clang++");
    assert_eq!(config.toolchain.gdb_args, ["-q", "-ex", "set pagination off"]);
    assert!(config.toolchain.work_dir.is_none());

    assert!(config.validate().is_ok());
}

#[test]
fn test_config_path_ends_with_expected() {
    let path = Config::config_path();
    assert!(path.ends_with("runbox/config.toml"));
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[server]
bind_addr = "127.0.0.1:8080"

[sessions]
max_sessions = 8
prompt_marker = "(lldb) "

[toolchain]
gdb = "/opt/gdb/bin/gdb"
work_dir = "/var/tmp/runbox"
"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
    assert_eq!(config.server.shutdown_timeout_seconds, 10);
    assert_eq!(config.sessions.max_sessions, 8);
    assert_eq!(config.sessions.prompt_marker, "(lldb) ");
    assert_eq!(config.sessions.grace_period_seconds, 30);
    assert_eq!(config.toolchain.gdb, "/opt/gdb/bin/gdb");
    assert_eq!(config.toolchain.gcc, "gcc");
    assert_eq!(
        config.toolchain.work_dir,
        Some(PathBuf::from("/var/tmp/runbox"))
    );

    let settings = SessionSettings::from(&config.sessions);
    assert_eq!(settings.max_sessions, 8);
    assert_eq!(settings.grace_period.as_secs(), 30);
    assert_eq!(settings.input_grace.as_millis(), 200);
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sessions\nmax_sessions = ").unwrap();

    match Config::load_from(&path).unwrap_err() {
        ConfigError::ParseError { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("Expected ParseError, got {other:?}"),
    }
}

#[test]
fn test_validation_rejects_zero_capacity() {
    let mut config = Config::default();
    config.sessions.max_sessions = 0;

    match config.validate().unwrap_err() {
        ConfigError::ValidationError { message } => {
            assert!(message.contains("max_sessions"));
        }
        other => panic!("Expected ValidationError, got {other:?}"),
    }
}

#[test]
fn test_validation_rejects_bad_bind_and_marker() {
    let mut config = Config::default();
    config.server.bind_addr = "not-an-address".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError { .. })
    ));

    let mut config = Config::default();
    config.sessions.prompt_marker.clear();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError { .. })
    ));

    let mut config = Config::default();
    config.sessions.read_chunk_bytes = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_file_fails_validation_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sessions]\nmax_sessions = 0\n").unwrap();

    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::ValidationError { .. })
    ));
}

#[test]
fn test_store_reload_replaces_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sessions]\nmax_sessions = 2\n").unwrap();

    let store = ConfigStore::new(Config::load_from(&path).unwrap(), path.clone());
    assert_eq!(store.get().sessions.max_sessions, 2);
    assert_eq!(store.path(), path.as_path());

    std::fs::write(&path, "[sessions]\nmax_sessions = 5\n").unwrap();
    store.reload().unwrap();
    assert_eq!(store.get().sessions.max_sessions, 5);

    // A broken file leaves the previous config in place.
    std::fs::write(&path, "[sessions]\nmax_sessions = 0\n").unwrap();
    assert!(store.reload().is_err());
    assert_eq!(store.get().sessions.max_sessions, 5);
}
