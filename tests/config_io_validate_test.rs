use ocea_exporter::config::{Config, ReconcileStrategy};
use std::fs;

#[test]
fn save_and_load_yaml_keeps_settings_but_not_password() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.credentials.username = "resident@example.com".to_string();
    cfg.credentials.password = "secret".to_string();
    cfg.poll.strategy = ReconcileStrategy::Direct;
    cfg.state.file = tmp_dir.path().join("state.json");

    cfg.save_to_file(&path).unwrap();
    assert!(!fs::read_to_string(&path).unwrap().contains("secret"));

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.credentials.username, "resident@example.com");
    assert!(loaded.credentials.password.is_empty());
    assert_eq!(loaded.poll.strategy, ReconcileStrategy::Direct);
    assert_eq!(loaded.state.file, cfg.state.file);
}

#[test]
fn load_prefers_explicit_path() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        "credentials:\n  username: a@example.com\n  password: pw\npoll:\n  interval_secs: 600\n",
    )
    .unwrap();

    let cfg = Config::load(Some(tmp.path())).unwrap();
    assert_eq!(cfg.poll.interval_secs, 600);
    assert_eq!(cfg.credentials.password, "pw");
    cfg.validate().unwrap();
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    cfg.credentials.username = "a@example.com".to_string();
    cfg.credentials.password = "pw".to_string();
    cfg.validate().unwrap();

    let base = cfg.clone();

    cfg.api.base_url = "not a url".to_string();
    assert!(cfg.validate().is_err());

    cfg = base.clone();
    cfg.poll.interval_secs = 0;
    assert!(cfg.validate().is_err());

    cfg = base.clone();
    cfg.metrics.listen_addr = "localhost".to_string();
    assert!(cfg.validate().is_err());

    // The address is not checked when the endpoint is off
    cfg.metrics.enabled = false;
    cfg.validate().unwrap();
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}
