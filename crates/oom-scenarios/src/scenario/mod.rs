//! Resistance scenarios against the simulated engine
//!
//! Each scenario builds its own sessions from an [`Environment`], folds
//! test failures (leaks, exhausted escalations, failed checks) into a
//! [`ScenarioReport`] and propagates only fatal harness errors.

pub mod open_close;
pub mod resistance;

use oom_harness::{
    CapabilityError, CapabilityTable, ConfigError, Escalated, HarnessError, InjectionSession,
    ResolvedInjector, StrategyConfig,
};
use oom_sim::{SimConfig, SimHeap, SimInjector, SimStats, Status};
use serde::Serialize;
use std::fmt::Write as _;

/// Session type produced by [`Environment::session`]
pub type EnvSession<'e> = InjectionSession<&'e mut ResolvedInjector, SimConfig>;

/// Resolved injector plus the simulated collaborators it drives
#[derive(Debug)]
pub struct Environment {
    injector: ResolvedInjector,
    config: SimConfig,
    heap: SimHeap,
    sim: SimInjector,
}

impl Environment {
    /// Resolve `table`, which must drive `sim`
    ///
    /// # Errors
    /// [`CapabilityError::Missing`] when an entry point is absent.
    pub fn new(table: CapabilityTable, sim: SimInjector) -> Result<Self, CapabilityError> {
        let injector = table.resolve()?;
        Ok(Self {
            injector,
            config: sim.config(),
            heap: sim.heap(),
            sim,
        })
    }

    /// Fresh simulator using `law` for its random strategy
    ///
    /// # Errors
    /// As [`Environment::new`].
    pub fn simulated(law: oom_sim::RandomLaw) -> Result<Self, CapabilityError> {
        let sim = SimInjector::with_law(law);
        Self::new(sim.capabilities(), sim)
    }

    /// Inactive session with `strategy` applied
    ///
    /// # Errors
    /// Strategy validation or configuration write failures.
    pub fn session(&mut self, strategy: StrategyConfig) -> Result<EnvSession<'_>, ConfigError> {
        InjectionSession::new(&mut self.injector, self.config.clone(), strategy)
    }

    /// Heap the engine allocates from
    #[must_use]
    pub fn heap(&self) -> &SimHeap {
        &self.heap
    }

    /// Simulator the resolved entry points drive
    #[must_use]
    pub fn simulator(&self) -> &SimInjector {
        &self.sim
    }

    /// Simulator counters
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.sim.stats()
    }
}

/// Outcome of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario name
    pub scenario: &'static str,
    /// Sessions run
    pub sessions: u32,
    /// Escalation attempts across all calls
    pub attempts: u64,
    /// Attempts that missed their target
    pub misses: u64,
    /// Last status observed
    pub final_status: Option<Status>,
    /// Simulator activity during the scenario
    pub stats: SimStats,
    /// Test failures
    pub failures: Vec<String>,
}

impl ScenarioReport {
    pub(crate) fn new(scenario: &'static str) -> Self {
        Self {
            scenario,
            sessions: 0,
            attempts: 0,
            misses: 0,
            final_status: None,
            stats: SimStats::default(),
            failures: Vec::new(),
        }
    }

    /// Report for a scenario that aborted by panicking
    #[must_use]
    pub fn aborted(scenario: &'static str, message: String) -> Self {
        let mut report = Self::new(scenario);
        report.failures.push(message);
        report
    }

    /// True when no failure was recorded
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold one escalation result into the totals
    pub(crate) fn absorb(&mut self, outcome: &Escalated<Status>) {
        self.attempts += u64::from(outcome.attempts);
        self.misses += u64::from(outcome.misses);
        self.final_status = Some(outcome.status);
    }

    /// Record test failures; fatal errors are handed back
    pub(crate) fn conclude(&mut self, result: Result<(), HarnessError>) -> Result<(), HarnessError> {
        match result {
            Err(err) if err.is_test_failure() => {
                tracing::warn!(scenario = self.scenario, %err, "scenario check failed");
                self.failures.push(err.to_string());
                Ok(())
            }
            other => other,
        }
    }

    pub(crate) fn measure(&mut self, before: SimStats, after: SimStats) {
        self.stats = SimStats {
            allocations: after.allocations - before.allocations,
            failures: after.failures - before.failures,
            frees: after.frees - before.frees,
            activations: after.activations - before.activations,
        };
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Scenario: {} ===", self.scenario);
        let _ = writeln!(report, "Sessions: {}", self.sessions);
        let _ = writeln!(report, "Escalation Attempts: {}", self.attempts);
        let _ = writeln!(report, "Missed Attempts: {}", self.misses);
        if let Some(status) = self.final_status {
            let _ = writeln!(report, "Final Status: {status}");
        }
        let _ = writeln!(report, "Allocations: {}", self.stats.allocations);
        let _ = writeln!(report, "Injected Failures: {}", self.stats.failures);

        if !self.failures.is_empty() {
            report.push_str("\n=== Failures ===\n");
            for (i, failure) in self.failures.iter().enumerate() {
                let _ = writeln!(report, "{}. {failure}", i + 1);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }

    /// JSON rendering
    ///
    /// # Errors
    /// Serialization failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
