//! Retry escalation
//!
//! Retries an operation until it reports a target status. Attempt `i` runs
//! inside a guard protecting its first `i` allocation events, so each retry
//! moves the injected failure one allocation further into the operation.
//! Under a step strategy some finite `i` protects every allocation of the
//! attempt, which bounds the loop; under a random strategy the widening
//! window makes termination expected.

use crate::capability::Injector;
use crate::config::ConfigSink;
use crate::error::HarnessError;
use crate::session::InjectionSession;
use std::fmt;

/// An operation driven by [`Escalation`]
pub trait Attempt<I: Injector, C: ConfigSink> {
    /// Outcome reported by the target library
    type Status: PartialEq + fmt::Debug;

    /// Perform the operation once
    fn attempt(&mut self, session: &mut InjectionSession<I, C>) -> Self::Status;

    /// Clean up after an attempt that missed the target; runs with injection disarmed
    fn recover(&mut self, _session: &mut InjectionSession<I, C>, _status: &Self::Status) {}
}

impl<I, C, S, F> Attempt<I, C> for F
where
    I: Injector,
    C: ConfigSink,
    S: PartialEq + fmt::Debug,
    F: FnMut(&mut InjectionSession<I, C>) -> S,
{
    type Status = S;

    fn attempt(&mut self, session: &mut InjectionSession<I, C>) -> S {
        self(session)
    }
}

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Retry with a widening protection window until the target is reached
    Exhaustive,
    /// One unguarded invocation
    Single,
}

/// Transient record of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord<S> {
    /// Escalation index the attempt ran with
    pub index: u32,
    /// Status it reported
    pub status: S,
}

/// Terminal result of an escalation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalated<S> {
    /// Final status
    pub status: S,
    /// Attempts performed, including the final one
    pub attempts: u32,
    /// Attempts that reported something other than the target
    pub misses: u32,
    /// Whether `status` equals the target
    pub reached_target: bool,
}

impl<S> Escalated<S> {
    /// Escalation index of the final attempt
    #[must_use]
    pub fn final_index(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Escalation engine configured with a target status
#[derive(Debug, Clone)]
pub struct Escalation<S> {
    target: S,
    mode: Mode,
    limit: Option<u32>,
}

impl<S: PartialEq + fmt::Debug> Escalation<S> {
    /// Retry until `target` is reported
    pub fn until(target: S) -> Self {
        Self {
            target,
            mode: Mode::Exhaustive,
            limit: None,
        }
    }

    /// Observe a single unguarded outcome, compared against `target`
    pub fn single(target: S) -> Self {
        Self {
            target,
            mode: Mode::Single,
            limit: None,
        }
    }

    /// Switch to single-attempt mode when `single` is true
    #[must_use]
    pub fn single_if(mut self, single: bool) -> Self {
        if single {
            self.mode = Mode::Single;
        }
        self
    }

    /// Give up after `max_attempts`
    #[must_use]
    pub fn with_limit(mut self, max_attempts: u32) -> Self {
        self.limit = Some(max_attempts.max(1));
        self
    }

    /// Optional attempt bound
    #[must_use]
    pub fn with_optional_limit(self, max_attempts: Option<u32>) -> Self {
        match max_attempts {
            Some(limit) => self.with_limit(limit),
            None => self,
        }
    }

    /// Target status
    pub fn target(&self) -> &S {
        &self.target
    }

    /// Retry policy
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Drive a closure to the target status; see [`Escalation::run`]
    ///
    /// # Errors
    /// As [`Escalation::run`].
    pub fn retry<I, C, F>(
        &self,
        session: &mut InjectionSession<I, C>,
        mut op: F,
    ) -> Result<Escalated<S>, HarnessError>
    where
        I: Injector,
        C: ConfigSink,
        F: FnMut(&mut InjectionSession<I, C>) -> S,
    {
        self.run(session, &mut op)
    }

    /// Drive `op` to the target status
    ///
    /// # Errors
    /// [`HarnessError::EscalationExhausted`] when a limit is set and reached
    /// without observing the target.
    pub fn run<I, C, A>(
        &self,
        session: &mut InjectionSession<I, C>,
        op: &mut A,
    ) -> Result<Escalated<S>, HarnessError>
    where
        I: Injector,
        C: ConfigSink,
        A: Attempt<I, C, Status = S>,
    {
        if self.mode == Mode::Single {
            let status = op.attempt(session);
            let reached_target = status == self.target;
            return Ok(Escalated {
                status,
                attempts: 1,
                misses: u32::from(!reached_target),
                reached_target,
            });
        }

        let mut index: u32 = 0;
        let mut misses: u32 = 0;
        loop {
            let status = {
                let mut guard = session.escalated(index);
                op.attempt(&mut guard)
            };
            if status == self.target {
                return Ok(Escalated {
                    status,
                    attempts: attempts_through(index),
                    misses,
                    reached_target: true,
                });
            }
            misses += 1;

            let record = AttemptRecord { index, status };
            let mut guard = session.forever();
            tracing::trace!(index = record.index, status = ?record.status, "attempt missed target");
            op.recover(&mut guard, &record.status);

            let attempts = attempts_through(index);
            let exhausted = self.limit.is_some_and(|limit| attempts >= limit);
            match index.checked_add(1) {
                Some(next) if !exhausted => index = next,
                _ => {
                    let last_status = format!("{:?}", record.status);
                    tracing::debug!(attempts, %last_status, "escalation exhausted");
                    return Err(HarnessError::EscalationExhausted {
                        attempts,
                        last_status,
                    });
                }
            }
        }
    }
}

/// Attempts performed once escalation index `index` has run
fn attempts_through(index: u32) -> u32 {
    index.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, StrategyConfig};
    use crate::mock::MockInjector;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn session(injector: MockInjector) -> InjectionSession<MockInjector, MemoryConfig> {
        InjectionSession::new(injector, MemoryConfig::new(), StrategyConfig::step(0)).unwrap()
    }

    /// Succeeds once it has been retried `needed` times
    struct FailsUntil {
        needed: u32,
        calls: u32,
        recovered: Vec<u32>,
    }

    impl<I: Injector, C: ConfigSink> Attempt<I, C> for FailsUntil {
        type Status = bool;

        fn attempt(&mut self, _session: &mut InjectionSession<I, C>) -> bool {
            self.calls += 1;
            self.calls > self.needed
        }

        fn recover(&mut self, session: &mut InjectionSession<I, C>, _status: &bool) {
            assert!(session.suspended_forever());
            self.recovered.push(self.calls);
        }
    }

    #[test]
    fn attempt_count_saturates_at_the_last_index() {
        assert_eq!(attempts_through(0), 1);
        assert_eq!(attempts_through(41), 42);
        assert_eq!(attempts_through(u32::MAX), u32::MAX);
    }

    #[test]
    fn first_success_needs_no_injector_calls() {
        let mut injector = MockInjector::new();
        injector.expect_pause().never();
        injector.expect_resume().never();

        let mut s = session(injector);
        let out = Escalation::until(true)
            .retry(&mut s, |_| true)
            .unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.misses, 0);
        assert!(out.reached_target);
    }

    #[test]
    fn each_retry_widens_the_budget() {
        let mut injector = MockInjector::new();
        let mut seq = Sequence::new();
        // attempt 0 exposed, its recovery disarmed
        injector.expect_pause().with(eq(0)).times(1).in_sequence(&mut seq).return_const(());
        injector.expect_resume().times(1).in_sequence(&mut seq).return_const(());
        // attempt 1 protected for one event
        injector.expect_pause().with(eq(0)).times(1).in_sequence(&mut seq).return_const(());
        injector.expect_pause().with(eq(1)).times(1).in_sequence(&mut seq).return_const(());
        injector.expect_resume().times(1).in_sequence(&mut seq).return_const(());
        // recovery after attempt 1
        injector.expect_pause().with(eq(0)).times(1).in_sequence(&mut seq).return_const(());
        injector.expect_resume().times(1).in_sequence(&mut seq).return_const(());
        // attempt 2 succeeds
        injector.expect_pause().with(eq(0)).times(1).in_sequence(&mut seq).return_const(());
        injector.expect_pause().with(eq(2)).times(1).in_sequence(&mut seq).return_const(());
        injector.expect_resume().times(1).in_sequence(&mut seq).return_const(());

        let mut s = session(injector);
        let mut op = FailsUntil {
            needed: 2,
            calls: 0,
            recovered: Vec::new(),
        };
        let out = Escalation::until(true).run(&mut s, &mut op).unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(out.misses, 2);
        assert_eq!(out.final_index(), 2);
        assert_eq!(op.recovered, vec![1, 2]);
        assert_eq!(s.pause_depth(), 0);
    }

    #[test]
    fn single_mode_is_unguarded_and_never_recovers() {
        let mut injector = MockInjector::new();
        injector.expect_pause().never();
        injector.expect_resume().never();

        let mut s = session(injector);
        let mut op = FailsUntil {
            needed: 5,
            calls: 0,
            recovered: Vec::new(),
        };
        let out = Escalation::single(true).run(&mut s, &mut op).unwrap();
        assert!(!out.reached_target);
        assert_eq!(out.attempts, 1);
        assert!(op.recovered.is_empty());
    }

    #[test]
    fn limit_reports_exhaustion() {
        let mut injector = MockInjector::new();
        injector.expect_pause().return_const(());
        injector.expect_resume().return_const(());

        let mut s = session(injector);
        let err = Escalation::until(0)
            .with_limit(4)
            .retry(&mut s, |_| 7)
            .unwrap_err();
        match err {
            HarnessError::EscalationExhausted {
                attempts,
                last_status,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_status, "7");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(s.pause_depth(), 0);
    }

    #[test]
    fn single_if_switches_mode() {
        assert_eq!(Escalation::until(1).single_if(true).mode(), Mode::Single);
        assert_eq!(Escalation::until(1).single_if(false).mode(), Mode::Exhaustive);
        assert_eq!(*Escalation::until(3).target(), 3);
    }
}
