//! Configuration resolution tests
//!
//! Covers TOML loading, `RUSLE_*` environment overrides and graceful fallback
//! to defaults.
//!
//! Note: Uses serial_test to prevent ENV variable race conditions. Every test
//! that touches `RUSLE_*` variables is marked #[serial].

use rusle_common::config::{load_toml_config, write_toml_config, TomlConfig, CONFIG_PATH_ENV};
use rusle_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;

const ENV_VARS: &[&str] = &[
    CONFIG_PATH_ENV,
    "RUSLE_HOST",
    "RUSLE_PORT",
    "RUSLE_MAX_AOI_AREA_KM2",
    "RUSLE_DEFAULT_EXPORT_SCALE",
    "RUSLE_COMPUTE_URL",
    "RUSLE_COMPUTE_API_KEY",
    "RUSLE_SESSION_TTL_SECS",
    "RUSLE_LOG_LEVEL",
    "RUSLE_BOUNDARY_CATALOG",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).expect("write config");
    path
}

#[test]
#[serial]
fn test_resolve_explicit_file() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [limits]
        max_aoi_area_km2 = 20000.0
        default_export_scale = 250

        [compute]
        base_url = "https://compute.example.org/v1"
        max_retries = 5
        "#,
    );

    let config = TomlConfig::resolve(Some(&path)).unwrap();

    assert_eq!(config.limits.max_aoi_area_km2, 20_000.0);
    assert_eq!(config.limits.default_export_scale, 250);
    assert_eq!(config.compute.base_url, "https://compute.example.org/v1");
    assert_eq!(config.compute.max_retries, 5);
    // Untouched sections keep defaults
    assert_eq!(config.sessions.ttl_secs, 3600);
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [server]
        port = 6000

        [logging]
        level = "warn"
        "#,
    );

    env::set_var("RUSLE_PORT", "6100");
    env::set_var("RUSLE_LOG_LEVEL", "debug");
    env::set_var("RUSLE_COMPUTE_API_KEY", "secret");

    let config = TomlConfig::resolve(Some(&path)).unwrap();
    clear_env();

    assert_eq!(config.server.port, 6100);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.compute.api_key.as_deref(), Some("secret"));
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[sessions]\nttl_secs = 120\n");
    env::set_var(CONFIG_PATH_ENV, &path);

    let config = TomlConfig::resolve(None).unwrap();
    clear_env();

    assert_eq!(config.sessions.ttl_secs, 120);
}

#[test]
#[serial]
fn test_invalid_env_value_is_config_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");
    env::set_var("RUSLE_PORT", "not-a-port");

    let result = TomlConfig::resolve(Some(&path));
    clear_env();

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    clear_env();
    let result = TomlConfig::resolve(Some(std::path::Path::new(
        "/nonexistent/rusle/config.toml",
    )));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_malformed_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[limits\nmax_aoi_area_km2 = ");
    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
fn test_write_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.catalog.boundaries_path = Some(PathBuf::from("/srv/gaul/level1.geojson"));
    config.compute.export_folder = "soil_loss".to_string();

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
}
