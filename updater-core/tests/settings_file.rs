//! YAML settings loading and validation.

use std::fs;

use tempfile::TempDir;
use updater_core::{
    config::DEFAULT_MAX_CONCURRENCY, ConfigError, EngineConfig, OverlapPolicy, UpdaterSettings,
};

#[test]
fn missing_keys_take_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("settings.yaml");
    fs::write(&path, "label_enable: true\n").expect("write");

    let settings = UpdaterSettings::load(&path).expect("load");
    assert!(settings.label_enable);
    assert_eq!(settings.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    assert_eq!(settings.overlap_policy, OverlapPolicy::Wait);
    assert!(settings.update_only_label);
}

#[test]
fn full_file_round_trips_into_engine_config() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("settings.yaml");
    fs::write(
        &path,
        "blacklist:\n  - '^traefik$'\n  - 'db-.*'\nmax_concurrency: 4\noverlap_policy: reject\ninterval_secs: 60\n",
    )
    .expect("write");

    let settings = UpdaterSettings::load(&path).expect("load");
    let config = EngineConfig::from_settings(&settings).expect("valid");
    assert_eq!(config.max_concurrency, 4);
    assert_eq!(config.overlap_policy, OverlapPolicy::Reject);
    assert_eq!(settings.interval_secs, Some(60));
}

#[test]
fn unknown_key_is_a_parse_error_with_path() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("settings.yaml");
    fs::write(&path, "max_threads: 3\n").expect("write");

    let err = UpdaterSettings::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("settings.yaml"));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = UpdaterSettings::load(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
}

#[test]
fn both_eligibility_modes_in_file_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("settings.yaml");
    fs::write(&path, "label_enable: true\nblacklist: ['foo']\n").expect("write");

    let settings = UpdaterSettings::load(&path).expect("load");
    assert!(matches!(
        EngineConfig::from_settings(&settings),
        Err(ConfigError::ConflictingEligibility)
    ));
}
