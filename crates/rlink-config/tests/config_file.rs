//! Config file persistence tests

use rlink_config::{Backend, Config};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("rlink.toml");

    let mut config = Config::default();
    config.set("backend", "reference".to_string()).unwrap();
    config.set("max-depth", "12".to_string()).unwrap();
    config.set("r-home", "/opt/R/4.4".to_string()).unwrap();
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.get_backend().unwrap(), Backend::Reference);
    assert_eq!(loaded.get_max_depth(), 12);
    assert_eq!(loaded.r_home.as_deref(), Some("/opt/R/4.4"));
    assert!(loaded.r_executable.is_none());
}

#[test]
fn test_file_uses_kebab_case_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rlink.toml");

    let mut config = Config::default();
    config.set("log-runtime-output", "true".to_string()).unwrap();
    config.save_to(&path).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("log-runtime-output = true"));
    assert!(!content.contains("r-home"));
}

#[test]
fn test_missing_file_is_default() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert!(config.is_empty());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rlink.toml");
    fs::write(&path, "max-depth = \"deep\"\n").unwrap();
    assert!(Config::load_from(&path).is_err());
}
