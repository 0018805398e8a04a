//! Injection session: activation lifecycle, pause discipline and leak accounting
//!
//! ```text
//! Inactive --activate()--> Active --deactivate()--> Inactive
//! ```
//!
//! A session owns the injector handle, the strategy configurator and the
//! pause stack for one scenario. Dropping a session that is still active
//! pauses, deactivates and checks for leaks, then clears the configuration.
//!
//! Protocol violations panic where they are detected. The
//! `lenient-protocol` feature turns them into `Err` returns instead.

use crate::capability::Injector;
use crate::config::{ConfigSink, StrategyConfig, StrategyConfigurator};
use crate::error::{ConfigError, HarnessError, ProtocolError};
use crate::guard::SuspensionGuard;
use crate::pause::{Owner, PauseRequest, PauseStack, Suspension};
use std::fmt;

/// Activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Injector not armed by this session
    Inactive,
    /// Injector activated by this session
    Active,
}

/// Allocations reported live at deactivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeakCount(pub u32);

impl LeakCount {
    /// True for a well-behaved target
    #[inline]
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Require zero leaks
    ///
    /// # Errors
    /// [`HarnessError::Leaked`] with the count.
    pub fn ensure_none(self) -> Result<(), HarnessError> {
        if self.is_zero() {
            Ok(())
        } else {
            Err(HarnessError::Leaked { count: self.0 })
        }
    }
}

impl fmt::Display for LeakCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} leaked block(s)", self.0)
    }
}

/// One scenario's ownership of the injector
pub struct InjectionSession<I: Injector, C: ConfigSink> {
    injector: I,
    configurator: StrategyConfigurator<C>,
    strategy: StrategyConfig,
    state: SessionState,
    pauses: PauseStack,
}

impl<I: Injector, C: ConfigSink> InjectionSession<I, C> {
    /// Create an inactive session and apply `strategy` through `sink`
    ///
    /// # Errors
    /// Any [`ConfigError`] from validating or writing the strategy.
    pub fn new(injector: I, sink: C, strategy: StrategyConfig) -> Result<Self, ConfigError> {
        let mut configurator = StrategyConfigurator::new(sink);
        configurator.configure(strategy)?;
        Ok(Self {
            injector,
            configurator,
            strategy,
            state: SessionState::Inactive,
            pauses: PauseStack::new(),
        })
    }

    /// Arm the injector
    ///
    /// # Errors
    /// [`ProtocolError::AlreadyActive`] if called twice, under `lenient-protocol`.
    ///
    /// # Panics
    /// On the same violation without `lenient-protocol`.
    pub fn activate(&mut self) -> Result<(), ProtocolError> {
        if self.state == SessionState::Active {
            return violation(ProtocolError::AlreadyActive);
        }
        tracing::debug!(strategy = ?self.strategy, "activating injector");
        self.injector.activate();
        self.state = SessionState::Active;
        Ok(())
    }

    /// Disarm the injector and report leaks; the caller checks the count
    ///
    /// # Errors
    /// [`ProtocolError::NotActive`] when inactive,
    /// [`ProtocolError::PausesOutstanding`] when pause scopes are open.
    /// Both panic unless `lenient-protocol` is enabled.
    pub fn deactivate(&mut self) -> Result<LeakCount, ProtocolError> {
        if self.state == SessionState::Inactive {
            return violation(ProtocolError::NotActive);
        }
        if !self.pauses.is_empty() {
            return violation(ProtocolError::PausesOutstanding {
                depth: self.pauses.depth(),
            });
        }
        let leaks = LeakCount(self.injector.deactivate());
        self.state = SessionState::Inactive;
        tracing::debug!(leaks = leaks.0, "injector deactivated");
        Ok(leaks)
    }

    /// Open a manual pause scope, closed by [`InjectionSession::resume`]
    pub fn pause(&mut self, request: PauseRequest) -> Suspension {
        self.pauses.push(&mut self.injector, request, Owner::Manual)
    }

    /// Close the innermost manual pause scope
    ///
    /// # Errors
    /// [`ProtocolError::ResumeWithoutPause`] on an empty stack,
    /// [`ProtocolError::ResumeCrossesGuard`] when the innermost scope is a guard's.
    /// Both panic unless `lenient-protocol` is enabled.
    pub fn resume(&mut self) -> Result<Suspension, ProtocolError> {
        match self.pauses.pop(&mut self.injector, Owner::Manual) {
            Ok(suspension) => Ok(suspension),
            Err(err) => violation(err),
        }
    }

    /// Open a guarded scope closed when the guard drops
    pub fn guard(&mut self, request: PauseRequest) -> SuspensionGuard<'_, I, C> {
        SuspensionGuard::open(self, request)
    }

    /// Guard that keeps the injector disarmed for the rest of the scope
    pub fn forever(&mut self) -> SuspensionGuard<'_, I, C> {
        self.guard(PauseRequest::Forever)
    }

    /// Guard protecting the next `n` allocation events; `0` protects nothing
    pub fn escalated(&mut self, n: u32) -> SuspensionGuard<'_, I, C> {
        self.guard(PauseRequest::Budget(n))
    }

    /// Run `f` inside a guarded scope
    pub fn suspended<R>(&mut self, request: PauseRequest, f: impl FnOnce(&mut Self) -> R) -> R {
        let mut guard = self.guard(request);
        f(&mut guard)
    }

    /// Run `f` with injection disarmed
    pub fn protected<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.suspended(PauseRequest::Forever, f)
    }

    /// Deactivate if needed, require zero leaks and clear the configuration
    ///
    /// # Errors
    /// A non-zero leak count or a configuration clear failure. Open pauses
    /// are unwound first and then treated as a protocol violation.
    pub fn finish(mut self) -> Result<(), HarnessError> {
        let open = self.pauses.depth();
        self.pauses.unwind_to(&mut self.injector, 0);
        let leaks = match self.state {
            SessionState::Active => self.deactivate()?,
            SessionState::Inactive => LeakCount::default(),
        };
        let cleared = self.configurator.clear();
        if open > 0 {
            violation(ProtocolError::PausesOutstanding { depth: open })?;
        }
        cleared?;
        leaks.ensure_none()
    }

    /// Activation state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True between `activate()` and `deactivate()`
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Number of open pause scopes
    #[must_use]
    pub fn pause_depth(&self) -> usize {
        self.pauses.depth()
    }

    /// True when an open scope holds an indefinite suspension
    #[must_use]
    pub fn suspended_forever(&self) -> bool {
        self.pauses.suspended_forever()
    }

    /// Strategy applied at construction
    #[must_use]
    pub fn strategy(&self) -> StrategyConfig {
        self.strategy
    }

    /// Injector handle
    pub fn injector(&self) -> &I {
        &self.injector
    }

    /// Configuration sink
    pub fn config(&self) -> &C {
        self.configurator.sink()
    }

    pub(crate) fn open_guarded(&mut self, request: PauseRequest) -> (usize, Suspension) {
        let depth = self.pauses.depth();
        let suspension = self.pauses.push(&mut self.injector, request, Owner::Guard);
        (depth, suspension)
    }

    /// Close a guard's scope opened at `depth`, unwinding manual scopes left above it
    pub(crate) fn close_guarded(&mut self, depth: usize) {
        let stray = self.pauses.unwind_to(&mut self.injector, depth + 1);
        // only the guard's own entry is left above `depth`
        self.pauses.unwind_to(&mut self.injector, depth);
        if stray > 0 {
            report(&format!(
                "{stray} manual pause(s) left open inside a guarded scope"
            ));
        }
    }
}

impl<I: Injector, C: ConfigSink> Drop for InjectionSession<I, C> {
    fn drop(&mut self) {
        let open = self.pauses.depth();
        let mut problems = Vec::new();
        if self.state == SessionState::Active {
            self.injector.pause(0);
            tracing::warn!("session dropped while active; deactivating");
            self.pauses.unwind_to(&mut FreshlyPaused, 0);
            let leaks = self.injector.deactivate();
            self.state = SessionState::Inactive;
            if leaks != 0 {
                problems.push(format!("{leaks} allocation(s) leaked at session teardown"));
            }
        } else {
            self.pauses.unwind_to(&mut self.injector, 0);
        }
        if let Err(err) = self.configurator.clear() {
            problems.push(format!("strategy configuration not cleared: {err}"));
        }
        if open > 0 {
            problems.push(format!("session dropped with {open} pause scope(s) open"));
        }
        if !problems.is_empty() {
            report(&problems.join("; "));
        }
    }
}

impl<I: Injector, C: ConfigSink> fmt::Debug for InjectionSession<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionSession")
            .field("strategy", &self.strategy)
            .field("state", &self.state)
            .field("pauses", &self.pauses)
            .finish_non_exhaustive()
    }
}

/// Stand-in used to discard pause entries once the injector is already
/// paused for teardown; resuming there would rearm it before deactivation
struct FreshlyPaused;

impl Injector for FreshlyPaused {
    fn activate(&mut self) {}

    fn deactivate(&mut self) -> u32 {
        0
    }

    fn pause(&mut self, _duration: u32) {}

    fn resume(&mut self) {}
}

fn violation<T>(err: ProtocolError) -> Result<T, ProtocolError> {
    if !cfg!(feature = "lenient-protocol") {
        panic!("injection protocol violation: {err}");
    }
    Err(err)
}

/// Drop-time invariant failures panic, unless already unwinding
fn report(message: &str) {
    if std::thread::panicking() {
        tracing::error!("{message}");
    } else {
        panic!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigKey, MemoryConfig};
    use crate::mock::MockInjector;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn session(injector: MockInjector) -> InjectionSession<MockInjector, MemoryConfig> {
        InjectionSession::new(injector, MemoryConfig::new(), StrategyConfig::step(2)).unwrap()
    }

    #[test]
    fn construction_applies_strategy() {
        let s = session(MockInjector::new());
        assert_eq!(s.config().get(ConfigKey::Delay), Some(2));
        assert_eq!(s.state(), SessionState::Inactive);
        assert_eq!(s.pause_depth(), 0);
    }

    #[test]
    fn activate_then_deactivate() {
        let mut injector = MockInjector::new();
        let mut seq = Sequence::new();
        injector.expect_activate().times(1).in_sequence(&mut seq).return_const(());
        injector.expect_deactivate().times(1).in_sequence(&mut seq).return_const(0u32);

        let mut s = session(injector);
        s.activate().unwrap();
        assert!(s.is_active());
        assert_eq!(s.deactivate(), Ok(LeakCount(0)));
        assert!(!s.is_active());
    }

    #[test]
    #[cfg(not(feature = "lenient-protocol"))]
    #[should_panic(expected = "injection protocol violation: session is already active")]
    fn double_activate_panics() {
        let mut injector = MockInjector::new();
        injector.expect_activate().times(1).return_const(());
        injector.expect_pause().return_const(());
        injector.expect_deactivate().return_const(0u32);

        let mut s = session(injector);
        s.activate().unwrap();
        let _ = s.activate();
    }

    #[test]
    #[cfg(not(feature = "lenient-protocol"))]
    #[should_panic(expected = "injection protocol violation: session is not active")]
    fn deactivate_while_inactive_panics() {
        let mut injector = MockInjector::new();
        injector.expect_deactivate().never();

        let mut s = session(injector);
        let _ = s.deactivate();
    }

    #[test]
    #[cfg(not(feature = "lenient-protocol"))]
    #[should_panic(expected = "injection protocol violation: 1 pause scope(s) still open")]
    fn deactivate_with_open_pause_panics() {
        let mut injector = MockInjector::new();
        injector.expect_activate().return_const(());
        injector.expect_pause().return_const(());
        injector.expect_resume().never();
        injector.expect_deactivate().return_const(0u32);

        let mut s = session(injector);
        s.activate().unwrap();
        s.pause(PauseRequest::Forever);
        let _ = s.deactivate();
    }

    #[test]
    #[cfg(not(feature = "lenient-protocol"))]
    #[should_panic(expected = "injection protocol violation: resume without a matching pause")]
    fn resume_without_pause_panics() {
        let mut s = session(MockInjector::new());
        let _ = s.resume();
    }

    #[test]
    #[cfg(not(feature = "lenient-protocol"))]
    #[should_panic(expected = "injection protocol violation: 2 pause scope(s) still open")]
    fn finish_with_open_pauses_panics_after_cleanup() {
        let mut injector = MockInjector::new();
        injector.expect_activate().return_const(());
        injector.expect_pause().return_const(());
        injector.expect_resume().times(1).return_const(());
        injector.expect_deactivate().times(1).return_const(0u32);

        let mut s = session(injector);
        s.activate().unwrap();
        s.pause(PauseRequest::Forever);
        s.pause(PauseRequest::Budget(4));
        let _ = s.finish();
    }

    #[test]
    #[cfg(feature = "lenient-protocol")]
    fn lenient_violations_are_returned() {
        let mut injector = MockInjector::new();
        injector.expect_activate().times(1).return_const(());
        injector.expect_pause().return_const(());
        injector.expect_resume().times(1).return_const(());
        injector.expect_deactivate().times(1).return_const(0u32);

        let mut s = session(injector);
        assert_eq!(s.deactivate(), Err(ProtocolError::NotActive));
        assert_eq!(s.resume(), Err(ProtocolError::ResumeWithoutPause));
        s.activate().unwrap();
        assert_eq!(s.activate(), Err(ProtocolError::AlreadyActive));
        s.pause(PauseRequest::Forever);
        assert_eq!(
            s.deactivate(),
            Err(ProtocolError::PausesOutstanding { depth: 1 })
        );
        s.resume().unwrap();
        assert_eq!(s.deactivate(), Ok(LeakCount(0)));
    }

    #[test]
    #[should_panic(expected = "session dropped with 1 pause scope(s) open")]
    fn drop_with_open_pause_panics_without_resuming() {
        let mut injector = MockInjector::new();
        let mut seq = Sequence::new();
        injector.expect_activate().times(1).in_sequence(&mut seq).return_const(());
        injector
            .expect_pause()
            .with(eq(0))
            .times(2)
            .in_sequence(&mut seq)
            .return_const(());
        injector.expect_deactivate().times(1).in_sequence(&mut seq).return_const(0u32);
        injector.expect_resume().never();

        let mut s = session(injector);
        s.activate().unwrap();
        s.pause(PauseRequest::Forever);
        drop(s);
    }

    #[test]
    fn finish_reports_leaks() {
        let mut injector = MockInjector::new();
        injector.expect_activate().return_const(());
        injector.expect_deactivate().times(1).return_const(2u32);

        let mut s = session(injector);
        s.activate().unwrap();
        let err = s.finish().unwrap_err();
        assert!(matches!(err, HarnessError::Leaked { count: 2 }));
    }

    #[test]
    fn finish_clears_configuration() {
        let mut injector = MockInjector::new();
        injector.expect_activate().return_const(());
        injector.expect_deactivate().return_const(0u32);

        let mut sink = MemoryConfig::new();
        let mut s = InjectionSession::new(&mut injector, &mut sink, StrategyConfig::random(3)).unwrap();
        s.activate().unwrap();
        s.finish().unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn drop_while_active_pauses_before_deactivating() {
        let mut injector = MockInjector::new();
        let mut seq = Sequence::new();
        injector.expect_activate().times(1).in_sequence(&mut seq).return_const(());
        injector
            .expect_pause()
            .with(eq(0))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        injector.expect_deactivate().times(1).in_sequence(&mut seq).return_const(0u32);
        injector.expect_resume().never();

        let mut sink = MemoryConfig::new();
        {
            let mut s = InjectionSession::new(&mut injector, &mut sink, StrategyConfig::step(0)).unwrap();
            s.activate().unwrap();
        }
        assert!(sink.is_empty());
    }

    #[test]
    #[should_panic(expected = "leaked at session teardown")]
    fn drop_with_leaks_panics() {
        let mut injector = MockInjector::new();
        injector.expect_activate().return_const(());
        injector.expect_pause().return_const(());
        injector.expect_deactivate().return_const(1u32);

        let mut s = session(injector);
        s.activate().unwrap();
        drop(s);
    }

    #[test]
    fn closure_bracket_balances() {
        let mut injector = MockInjector::new();
        injector.expect_pause().with(eq(0)).times(1).return_const(());
        injector.expect_resume().times(1).return_const(());

        let mut s = session(injector);
        let depth = s.protected(|inner| {
            assert!(inner.suspended_forever());
            inner.pause_depth()
        });
        assert_eq!(depth, 1);
        assert_eq!(s.pause_depth(), 0);
    }
}
