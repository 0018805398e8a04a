//! Scoped suspension guard behavior against recording and simulated injectors

use oom_harness::{InjectionSession, MemoryConfig, PauseRequest, StrategyConfig};
use oom_test_utils::{active_sim_session, Call, RecordingInjector};
use proptest::prelude::*;
use std::panic::{self, AssertUnwindSafe};

type RecordingSession = InjectionSession<RecordingInjector, MemoryConfig>;

fn recording_session() -> (RecordingInjector, RecordingSession) {
    let injector = RecordingInjector::new();
    let session =
        InjectionSession::new(injector.clone(), MemoryConfig::new(), StrategyConfig::step(0))
            .unwrap();
    (injector, session)
}

fn nest<I, C>(session: &mut InjectionSession<I, C>, requests: &[PauseRequest], fail: bool)
where
    I: oom_harness::Injector,
    C: oom_harness::ConfigSink,
{
    match requests.split_first() {
        None => assert!(!fail, "assertion failed inside nested scopes"),
        Some((request, rest)) => {
            let mut guard = session.guard(*request);
            nest(&mut *guard, rest, fail);
        }
    }
}

fn request() -> impl Strategy<Value = PauseRequest> {
    prop_oneof![
        Just(PauseRequest::Forever),
        (0u32..4).prop_map(PauseRequest::Budget),
    ]
}

proptest! {
    #[test]
    fn nested_guards_balance_on_every_exit_path(
        requests in prop::collection::vec(request(), 0..24),
        fail in any::<bool>(),
    ) {
        let (injector, mut session) = recording_session();
        let result = panic::catch_unwind(AssertUnwindSafe(|| nest(&mut session, &requests, fail)));
        prop_assert_eq!(result.is_err(), fail);
        prop_assert_eq!(session.pause_depth(), 0);
        prop_assert!(injector.is_balanced());
        prop_assert!(injector.pauses() >= injector.resumes());
    }
}

#[test]
fn requests_inside_forever_make_no_calls() {
    let (injector, mut session) = recording_session();
    nest(
        &mut session,
        &[
            PauseRequest::Forever,
            PauseRequest::Budget(0),
            PauseRequest::Budget(5),
            PauseRequest::Forever,
        ],
        false,
    );
    assert_eq!(injector.calls(), vec![Call::Pause(0), Call::Resume]);
}

#[test]
fn budget_guard_brackets_its_own_bookkeeping() {
    let (injector, mut session) = recording_session();
    nest(&mut session, &[PauseRequest::Budget(3)], false);
    assert_eq!(
        injector.calls(),
        vec![Call::Pause(0), Call::Pause(3), Call::Resume]
    );
}

#[test]
fn inner_zero_guard_leaves_injector_disarmed() {
    let (sim, mut session) = active_sim_session(StrategyConfig::step(0));
    {
        let mut outer = session.forever();
        assert!(!sim.is_armed());
        {
            let _inner = outer.escalated(0);
            assert!(!sim.is_armed());
        }
        assert!(!sim.is_armed());
    }
    assert!(sim.is_armed());
    session.finish().unwrap();
}

#[test]
fn panicking_scope_rearms_the_injector() {
    let (sim, mut session) = active_sim_session(StrategyConfig::step(0));
    let heap = sim.heap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = session.forever();
        let _block = heap.allocate(8).unwrap();
        panic!("check failed while protected");
    }));
    assert!(result.is_err());
    assert!(sim.is_armed());
    assert_eq!(session.pause_depth(), 0);
    session.finish().unwrap();
}

#[test]
fn manual_pause_round_trip() {
    let (sim, mut session) = active_sim_session(StrategyConfig::step(0));
    let heap = sim.heap();
    session.pause(PauseRequest::Forever);
    let protected = heap.allocate(4);
    session.resume().unwrap();
    assert!(protected.is_ok());
    assert!(heap.allocate(4).is_err());
    drop(protected);
    session.finish().unwrap();
}

#[test]
#[cfg(not(feature = "lenient-protocol"))]
#[should_panic(expected = "resume would close a pause owned by a guard")]
fn manual_resume_cannot_cross_a_guard() {
    let (_injector, mut session) = recording_session();
    let mut guard = session.forever();
    let _ = guard.resume();
}

#[test]
#[cfg(not(feature = "lenient-protocol"))]
#[should_panic(expected = "resume without a matching pause")]
fn resume_on_empty_stack_is_rejected() {
    let (_injector, mut session) = recording_session();
    let _ = session.resume();
}

#[test]
#[cfg(feature = "lenient-protocol")]
fn rejected_resumes_make_no_calls() {
    let (injector, mut session) = recording_session();
    assert_eq!(
        session.resume().unwrap_err(),
        oom_harness::ProtocolError::ResumeWithoutPause
    );
    let mut guard = session.forever();
    assert_eq!(
        guard.resume().unwrap_err(),
        oom_harness::ProtocolError::ResumeCrossesGuard
    );
    assert_eq!(guard.pause_depth(), 1);
    drop(guard);
    assert_eq!(injector.calls(), vec![Call::Pause(0), Call::Resume]);
}

#[test]
fn forever_scope_inside_a_budget_keeps_the_rest_of_it() {
    let (sim, mut session) = active_sim_session(StrategyConfig::step(0));
    let heap = sim.heap();
    {
        let mut outer = session.escalated(2);
        let first = heap.allocate(8);
        {
            let _inner = outer.forever();
            assert!(heap.allocate(8).is_ok());
        }
        assert!(!sim.is_armed());
        let second = heap.allocate(8);
        assert!(first.is_ok() && second.is_ok());
        assert!(sim.is_armed());
        assert!(heap.allocate(8).is_err());
    }
    assert!(sim.is_armed());
    session.finish().unwrap();
}

#[test]
fn budget_is_reissued_when_the_injector_cannot_report_it() {
    let (injector, mut session) = recording_session();
    nest(&mut session, &[PauseRequest::Budget(3), PauseRequest::Forever], false);
    assert_eq!(
        injector.calls(),
        vec![
            Call::Pause(0),
            Call::Pause(3),
            Call::Pause(0),
            Call::Pause(3),
            Call::Resume,
        ]
    );
    assert!(injector.is_balanced());
}
