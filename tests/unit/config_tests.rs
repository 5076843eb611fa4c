use std::time::Duration;

use session_warden::{config::GlobalConfig, AppError};

fn quoted(path: &std::path::Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}

#[test]
fn minimal_config_uses_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!("data_dir = '{}'\n", quoted(temp.path()));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.http_port, None);
    assert_eq!(config.supervisor.sweep_interval_seconds, 5);
    assert_eq!(config.supervisor.max_session_logs, 100);
    assert_eq!(config.recovery.auto_recover, None);
    assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    assert!(config.db_path().ends_with("sessions.db"));
    assert!(config.data_dir.is_absolute());
}

#[test]
fn full_config_parses() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r"
data_dir = '{dir}'
http_port = 4780

[supervisor]
sweep_interval_seconds = 2
max_session_logs = 25

[recovery]
auto_recover = true
",
        dir = quoted(temp.path())
    );

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.http_port, Some(4780));
    assert_eq!(config.sweep_interval(), Duration::from_secs(2));
    assert_eq!(config.supervisor.max_session_logs, 25);
    assert_eq!(config.recovery.auto_recover, Some(true));
}

#[test]
fn missing_data_dir_is_created() {
    let temp = tempfile::tempdir().expect("tempdir");
    let nested = temp.path().join("a").join("b");
    let toml = format!("data_dir = '{}'\n", quoted(&nested));

    GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert!(nested.is_dir());
}

#[test]
fn zero_sweep_interval_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "data_dir = '{}'\n[supervisor]\nsweep_interval_seconds = 0\n",
        quoted(temp.path())
    );

    let err = GlobalConfig::from_toml_str(&toml).expect_err("zero interval");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("sweep_interval_seconds")));
}

#[test]
fn zero_log_cap_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "data_dir = '{}'\n[supervisor]\nmax_session_logs = 0\n",
        quoted(temp.path())
    );

    let err = GlobalConfig::from_toml_str(&toml).expect_err("zero logs");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("data_dir = ").expect_err("bad toml");
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn load_from_missing_file_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(temp.path().join("nope.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        format!("data_dir = '{}'\nhttp_port = 0\n", quoted(temp.path())),
    )
    .expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.http_port, Some(0));
}
