//! Settings file loading

use oom_scenarios::{HarnessSettings, SettingsError};
use oom_sim::RandomLaw;
use pretty_assertions::assert_eq;
use std::io::Write;

fn write_settings(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_partial_file_over_defaults() {
    let file = write_settings(
        r#"
log_filter = "debug"
max_attempts = 500

[resistance]
rows = 12
seed = 42
law = "periodic"
"#,
    );
    let settings = HarnessSettings::load(file.path()).unwrap();

    assert_eq!(settings.log_filter, "debug");
    assert_eq!(settings.max_attempts, Some(500));
    assert_eq!(settings.open_close.iterations, 100);
    assert_eq!(settings.resistance.rows, 12);
    assert_eq!(settings.resistance.duty_cycle, 2);
    assert_eq!(settings.resistance.seed, Some(42));
    assert_eq!(settings.resistance.law, RandomLaw::Periodic);
}

#[test]
fn unknown_fields_are_rejected() {
    let file = write_settings("[open_close]\nrepeat = 3\n");
    assert!(matches!(
        HarnessSettings::load(file.path()),
        Err(SettingsError::Parse(_))
    ));
}

#[test]
fn zero_duty_cycle_is_invalid() {
    let file = write_settings("[resistance]\nduty_cycle = 0\n");
    match HarnessSettings::load(file.path()) {
        Err(SettingsError::Invalid { field, .. }) => assert_eq!(field, "resistance.duty_cycle"),
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn zero_attempt_limit_is_invalid() {
    let err = HarnessSettings::from_toml_str("max_attempts = 0").unwrap_err();
    assert_eq!(err.to_string(), "invalid max_attempts: must be at least 1");
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match HarnessSettings::load(&path) {
        Err(SettingsError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected an I/O error, got {other:?}"),
    }
}
