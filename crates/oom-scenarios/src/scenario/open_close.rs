//! Open/close scenario
//!
//! Opens a database, runs a DDL/DML chain while every step succeeds and
//! closes it: first under the injector's default strategy for a number of
//! sessions, then under the step strategy with delay 0, 1, 2, ... until the
//! whole chain completes. Each session must finish without leaks.

use super::{Environment, ScenarioReport};
use crate::settings::HarnessSettings;
use oom_harness::{
    oom_safe_assert_eq, ConfigSink, HarnessError, InjectionSession, Injector, StrategyConfig,
};
use oom_sim::{Command, Database, SimHeap, Status};

/// Scenario name in reports
pub const NAME: &str = "open-close";

/// Commands run on every successfully opened database
#[must_use]
pub fn chain() -> Vec<Command> {
    vec![
        Command::create_table("test_table", "a", &["b", "c"]),
        Command::create_index("test_idx", "test_table", &["a", "b", "c"]),
        Command::insert_ints("test_table", &[&[1, 2], &[3, 4], &[5, 6]]),
        Command::drop_index("test_idx"),
        Command::drop_table("test_table"),
        Command::Vacuum,
    ]
}

/// Activate, then open and run the chain; returns the first non-Ok status
///
/// # Errors
/// Activation protocol errors.
pub fn try_open<I: Injector, C: ConfigSink>(
    session: &mut InjectionSession<I, C>,
    heap: &SimHeap,
    commands: &[Command],
) -> Result<Status, HarnessError> {
    session.activate()?;
    let status = match Database::open(heap) {
        Err(status) => {
            oom_safe_assert_eq!(session, status, Status::NoMem);
            status
        }
        Ok(mut db) => {
            let mut status = Status::Ok;
            for command in commands {
                status = db.execute(command);
                if status != Status::Ok {
                    break;
                }
            }
            oom_safe_assert_eq!(session, db.close(), Status::Ok);
            status
        }
    };
    Ok(status)
}

/// Run the scenario
///
/// # Errors
/// Fatal harness errors; leaks and an exhausted delay sweep are recorded in
/// the report instead.
pub fn run(env: &mut Environment, settings: &HarnessSettings) -> Result<ScenarioReport, HarnessError> {
    let mut report = ScenarioReport::new(NAME);
    let before = env.stats();
    let heap = env.heap().clone();
    let commands = chain();

    for _ in 0..settings.open_close.iterations {
        let mut session = env.session(StrategyConfig::Default)?;
        let status = try_open(&mut session, &heap, &commands)?;
        report.sessions += 1;
        report.final_status = Some(status);
        let finished = session.finish();
        report.conclude(finished)?;
    }

    let mut delay: u32 = 0;
    loop {
        let mut session = env.session(StrategyConfig::step(delay))?;
        let status = try_open(&mut session, &heap, &commands)?;
        report.sessions += 1;
        report.attempts += 1;
        report.final_status = Some(status);
        let finished = session.finish();
        report.conclude(finished)?;
        if status == Status::Ok {
            break;
        }
        report.misses += 1;

        let attempts = delay + 1;
        if settings.max_attempts.is_some_and(|limit| attempts >= limit) {
            let exhausted = HarnessError::EscalationExhausted {
                attempts,
                last_status: format!("{status:?}"),
            };
            report.conclude(Err(exhausted))?;
            break;
        }
        delay += 1;
    }

    tracing::info!(sessions = report.sessions, final_delay = delay, "open-close finished");
    report.measure(before, env.stats());
    Ok(report)
}
