//! Resistance scenario
//!
//! One random-strategy session drives the whole engine surface through
//! escalation: open, DDL, single-row inserts, then prepared inserts twice.
//! The first pass escalates every statement call on its own; the second runs
//! all inserts inside one transaction, retried as a whole under a widening
//! manual budget with rollback when it fails part way.

use super::{Environment, ScenarioReport};
use crate::settings::HarnessSettings;
use oom_harness::{
    oom_safe_assert, oom_safe_assert_eq, Attempt, ConfigSink, Escalation, HarnessError,
    InjectionSession, Injector, PauseRequest, StrategyConfig,
};
use oom_sim::{Command, Database, SimHeap, Statement, Status};

/// Scenario name in reports
pub const NAME: &str = "resistance";

const TABLE: &str = "test_table";
const INDEX: &str = "test_idx";
const TEXT: &str = "AAAAAAAAAAAAAAAA";

/// Escalated database open; failed handles are closed during recovery
struct Open<'h> {
    heap: &'h SimHeap,
    db: Option<Database>,
}

impl<I: Injector, C: ConfigSink> Attempt<I, C> for Open<'_> {
    type Status = Status;

    fn attempt(&mut self, _session: &mut InjectionSession<I, C>) -> Status {
        let (status, handle) = Database::open_handle(self.heap);
        self.db = handle;
        status
    }

    fn recover(&mut self, session: &mut InjectionSession<I, C>, status: &Status) {
        if let Some(db) = self.db.take() {
            oom_safe_assert!(session, !db.is_usable(), "failed open returned a usable handle: {status:?}");
            oom_safe_assert_eq!(session, db.close(), Status::Ok);
        }
    }
}

struct Run<'a> {
    report: &'a mut ScenarioReport,
    limit: Option<u32>,
}

impl Run<'_> {
    /// Escalate `command` until it reports Ok
    fn exec<I: Injector, C: ConfigSink>(
        &mut self,
        session: &mut InjectionSession<I, C>,
        db: &mut Database,
        command: &Command,
    ) -> Result<Status, HarnessError> {
        let outcome = Escalation::until(Status::Ok)
            .with_optional_limit(self.limit)
            .retry(session, |_| db.execute(command))?;
        self.report.absorb(&outcome);
        Ok(outcome.status)
    }

    /// Drive `call` to `target`, or observe it once when `single`
    fn call<I, C, F>(
        &mut self,
        session: &mut InjectionSession<I, C>,
        target: Status,
        single: bool,
        call: F,
    ) -> Result<bool, HarnessError>
    where
        I: Injector,
        C: ConfigSink,
        F: FnMut(&mut InjectionSession<I, C>) -> Status,
    {
        let outcome = Escalation::until(target)
            .single_if(single)
            .with_optional_limit(self.limit)
            .retry(session, call)?;
        self.report.absorb(&outcome);
        Ok(outcome.reached_target)
    }

    /// Reset, bind and step once per row; stops at the first miss
    fn insert_rows<I: Injector, C: ConfigSink>(
        &mut self,
        session: &mut InjectionSession<I, C>,
        db: &mut Database,
        stmt: &mut Statement,
        rows: u32,
        single: bool,
    ) -> Result<Status, HarnessError> {
        for _ in 0..rows {
            let completed = self.call(session, Status::Ok, single, |_| stmt.reset())?
                && self.call(session, Status::Ok, single, |_| stmt.bind_int(1, 1))?
                && self.call(session, Status::Ok, single, |_| stmt.bind_text(2, TEXT))?
                && self.call(session, Status::Done, single, |_| stmt.step(db))?;
            if !completed {
                break;
            }
        }
        Ok(self.report.final_status.unwrap_or(Status::Ok))
    }

    fn body<I: Injector, C: ConfigSink>(
        &mut self,
        session: &mut InjectionSession<I, C>,
        heap: &SimHeap,
        rows: u32,
    ) -> Result<(), HarnessError> {
        let mut open = Open { heap, db: None };
        let outcome = Escalation::until(Status::Ok)
            .with_optional_limit(self.limit)
            .run(session, &mut open)?;
        self.report.absorb(&outcome);
        oom_safe_assert!(session, open.db.is_some());
        let Some(mut db) = open.db.take() else {
            return Ok(());
        };

        self.exec(session, &mut db, &Command::create_table(TABLE, "a", &["b", "c"]))?;
        self.exec(session, &mut db, &Command::create_index(INDEX, TABLE, &["a", "b", "c"]))?;
        let row = Command::insert_ints(TABLE, &[&[1, 2]]);
        for _ in 0..rows {
            self.exec(session, &mut db, &row)?;
        }

        for single_transaction in [false, true] {
            let mut prepared = None;
            self.call(session, Status::Ok, false, |_| match db.prepare_insert(TABLE) {
                Ok(stmt) => {
                    prepared = Some(stmt);
                    Status::Ok
                }
                Err(status) => status,
            })?;
            oom_safe_assert!(session, prepared.is_some());
            let Some(mut stmt) = prepared else {
                return Ok(());
            };

            let mut budget: u32 = 0;
            loop {
                if single_transaction {
                    self.exec(session, &mut db, &Command::Begin)?;
                    oom_safe_assert!(session, !db.autocommit());
                    session.pause(PauseRequest::Budget(budget));
                }

                let status = self.insert_rows(session, &mut db, &mut stmt, rows, single_transaction)?;

                if single_transaction {
                    session.resume()?;
                    if !status.is_success() && !db.autocommit() {
                        self.exec(session, &mut db, &Command::Rollback)?;
                    }
                }
                if !(single_transaction && db.autocommit()) {
                    break;
                }
                budget += 1;
                if self.limit.is_some_and(|limit| budget >= limit) {
                    return Err(HarnessError::EscalationExhausted {
                        attempts: budget,
                        last_status: format!("{status:?}"),
                    });
                }
            }

            let mut stmt = Some(stmt);
            self.call(session, Status::Ok, false, |_| {
                stmt.take().map_or(Status::Misuse, Statement::finalize)
            })?;
            if single_transaction {
                self.exec(session, &mut db, &Command::Commit)?;
            }
        }

        oom_safe_assert_eq!(session, db.row_count(TABLE), Some(rows as usize * 3));

        self.exec(session, &mut db, &Command::drop_index(INDEX))?;
        self.exec(session, &mut db, &Command::drop_table(TABLE))?;
        self.exec(session, &mut db, &Command::Vacuum)?;
        oom_safe_assert_eq!(session, db.close(), Status::Ok);
        Ok(())
    }
}

/// Run the scenario
///
/// # Errors
/// Fatal harness errors; leaks and exhausted escalations are recorded in the
/// report instead.
pub fn run(env: &mut Environment, settings: &HarnessSettings) -> Result<ScenarioReport, HarnessError> {
    let mut report = ScenarioReport::new(NAME);
    let before = env.stats();
    let heap = env.heap().clone();
    let resistance = &settings.resistance;

    let mut strategy = StrategyConfig::random(resistance.duty_cycle);
    if let Some(seed) = resistance.seed {
        strategy = strategy.with_seed(seed);
    }

    let mut session = env.session(strategy)?;
    session.activate()?;
    report.sessions += 1;

    let outcome = Run {
        report: &mut report,
        limit: settings.max_attempts,
    }
    .body(&mut session, &heap, resistance.rows);
    session.protected(|_| report.conclude(outcome))?;
    let finished = session.finish();
    report.conclude(finished)?;

    tracing::info!(attempts = report.attempts, misses = report.misses, "resistance finished");
    report.measure(before, env.stats());
    Ok(report)
}
