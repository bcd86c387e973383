//! Tests for configuration loading and graceful degradation
//!
//! Tests that manipulate HWX_ROOT_FOLDER or HWX_CONFIG are marked with
//! #[serial] so they never run in parallel with each other.

use hwx_common::config::{
    load_config, read_toml_config, resolve_config_path, resolve_root_folder, write_toml_config,
    ChainMode, TomlConfig, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR,
};
use hwx_common::Error;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_config(Some(&temp_dir.path().join("absent.toml")));

    assert!(config.root_folder.is_none());
    assert_eq!(config.engine.max_retries_per_source, 2);
    assert_eq!(config.engine.chain_mode, ChainMode::FirstSuccess);
}

#[test]
fn test_invalid_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    let config = load_config(Some(&path));
    assert_eq!(config.engine.fetch_timeout_ms, 15_000);
}

#[test]
fn test_read_errors_say_what_failed() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");
    match read_toml_config(&missing) {
        Err(Error::ConfigRead { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected a read error, got {:?}", other),
    }

    let broken = temp_dir.path().join("broken.toml");
    std::fs::write(&broken, "this is = = not toml").unwrap();
    assert!(matches!(read_toml_config(&broken), Err(Error::ConfigParse(_))));
}

#[test]
fn test_chain_mode_names() {
    assert_eq!(" Exhaustive ".parse::<ChainMode>().unwrap(), ChainMode::Exhaustive);
    assert_eq!("first_success".parse::<ChainMode>().unwrap(), ChainMode::FirstSuccess);
    match "fastest".parse::<ChainMode>() {
        Err(Error::UnknownValue { kind, value }) => {
            assert_eq!(kind, "chain mode");
            assert_eq!(value, "fastest");
        }
        other => panic!("expected an unknown value, got {:?}", other),
    }
}

#[test]
fn test_write_then_load_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.engine.chain_mode = ChainMode::Exhaustive;
    config.engine.enable_secondary_tier = false;
    config
        .engine
        .domain_throttle_seconds
        .insert("gskill.com".to_string(), 3.0);
    config.browser.max_sessions = 4;

    write_toml_config(&config, &path).unwrap();
    let loaded = load_config(Some(&path));

    assert_eq!(loaded.engine.chain_mode, ChainMode::Exhaustive);
    assert!(!loaded.engine.enable_secondary_tier);
    assert_eq!(loaded.engine.domain_throttle_seconds.get("gskill.com"), Some(&3.0));
    assert_eq!(loaded.browser.max_sessions, 4);
}

#[test]
#[serial]
fn test_root_folder_priority() {
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    env::set_var(ROOT_FOLDER_ENV_VAR, "/from/env");
    assert_eq!(
        resolve_root_folder(Some(Path::new("/from/cli")), &config),
        PathBuf::from("/from/cli")
    );
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/env"));

    env::remove_var(ROOT_FOLDER_ENV_VAR);
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));

    let empty = TomlConfig::default();
    assert!(!resolve_root_folder(None, &empty).as_os_str().is_empty());
}

#[test]
#[serial]
fn test_config_path_priority() {
    env::set_var(CONFIG_ENV_VAR, "/env/hwx.toml");
    assert_eq!(
        resolve_config_path(Some(Path::new("/cli/hwx.toml"))),
        Some(PathBuf::from("/cli/hwx.toml"))
    );
    assert_eq!(resolve_config_path(None), Some(PathBuf::from("/env/hwx.toml")));
    env::remove_var(CONFIG_ENV_VAR);
}
