//! End-to-end scenario runs against the simulated engine

use oom_harness::{Capability, CapabilityError, CapabilityTable};
use oom_scenarios::scenario::{open_close, resistance};
use oom_scenarios::{Environment, HarnessSettings};
use oom_sim::{RandomLaw, SimInjector, Status};
use oom_test_utils::{init_test_logging, ArmedEventRecorder};
use tracing_subscriber::layer::SubscriberExt;
use pretty_assertions::assert_eq;

fn small_settings() -> HarnessSettings {
    let mut settings = HarnessSettings::default();
    settings.open_close.iterations = 4;
    settings.resistance.rows = 5;
    settings.resistance.seed = Some(7);
    settings
}

#[test]
fn open_close_reaches_a_clean_run() {
    init_test_logging();
    let mut env = Environment::simulated(RandomLaw::Independent).unwrap();
    let report = open_close::run(&mut env, &small_settings()).unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.final_status, Some(Status::Ok));
    assert!(report.sessions > 4);
    assert_eq!(report.misses + 1, report.attempts);
    assert!(report.stats.failures > 0);
    assert_eq!(report.stats.activations, u64::from(report.sessions));
}

#[test]
fn open_close_sweep_respects_the_attempt_limit() {
    let mut env = Environment::simulated(RandomLaw::Independent).unwrap();
    let mut settings = small_settings();
    settings.open_close.iterations = 0;
    settings.max_attempts = Some(1);
    let report = open_close::run(&mut env, &settings).unwrap();

    assert!(!report.passed());
    assert_eq!(report.sessions, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("after 1 attempt(s)"));
}

#[test]
fn resistance_passes_under_both_laws() {
    init_test_logging();
    for law in [RandomLaw::Independent, RandomLaw::Periodic] {
        let mut settings = small_settings();
        settings.resistance.law = law;
        let mut env = Environment::simulated(law).unwrap();
        let report = resistance::run(&mut env, &settings).unwrap();

        assert!(report.passed(), "{law:?}: {}", report.generate_text());
        assert_eq!(report.sessions, 1);
        assert!(report.attempts > report.misses);
        assert!(report.stats.failures > 0);
    }
}

#[test]
fn resistance_is_reproducible_with_a_seed() {
    let settings = small_settings();
    let first = resistance::run(&mut Environment::simulated(RandomLaw::Independent).unwrap(), &settings)
        .unwrap();
    let second = resistance::run(&mut Environment::simulated(RandomLaw::Independent).unwrap(), &settings)
        .unwrap();
    assert_eq!(first.attempts, second.attempts);
    assert_eq!(first.misses, second.misses);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn exhausted_resistance_is_a_recorded_failure() {
    let mut settings = small_settings();
    settings.resistance.duty_cycle = 1;
    settings.max_attempts = Some(1);
    let mut env = Environment::simulated(RandomLaw::Independent).unwrap();
    let report = resistance::run(&mut env, &settings).unwrap();

    assert!(!report.passed());
    assert_eq!(report.failures.len(), 1);
    assert!(report.generate_text().contains("=== Result: FAIL ==="));
}

#[test]
fn nothing_is_logged_while_the_injector_is_armed() {
    let mut exhausted = small_settings();
    exhausted.resistance.duty_cycle = 1;
    exhausted.max_attempts = Some(1);

    for (settings, failures) in [(small_settings(), 0), (exhausted, 1)] {
        let mut env = Environment::simulated(RandomLaw::Independent).unwrap();
        let recorder = ArmedEventRecorder::new(env.simulator().clone());
        let subscriber = tracing_subscriber::registry().with(recorder.clone());

        let report =
            tracing::subscriber::with_default(subscriber, || resistance::run(&mut env, &settings))
                .unwrap();

        assert_eq!(report.failures.len(), failures);
        assert_eq!(recorder.events(), Vec::<String>::new());
    }
}

#[test]
fn environment_lists_every_missing_entry_point() {
    let table = CapabilityTable::empty().with_activate(|| {});
    let err = Environment::new(table, SimInjector::new()).unwrap_err();
    assert_eq!(
        err,
        CapabilityError::Missing {
            missing: vec![Capability::Deactivate, Capability::Pause, Capability::Resume],
        }
    );
    assert_eq!(
        err.to_string(),
        "missing entry point(s): deactivate, pause, resume"
    );
}

#[test]
fn reports_render_as_text_and_json() {
    let mut env = Environment::simulated(RandomLaw::Independent).unwrap();
    let mut settings = small_settings();
    settings.open_close.iterations = 1;
    let report = open_close::run(&mut env, &settings).unwrap();

    let text = report.generate_text();
    assert!(text.starts_with("=== Scenario: open-close ==="));
    assert!(text.contains("=== Result: PASS ==="));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["scenario"], "open-close");
    assert_eq!(json["sessions"], u64::from(report.sessions));
    assert!(json["failures"].as_array().unwrap().is_empty());
}
