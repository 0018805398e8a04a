//! Engine behavior with the simulated injector armed

use oom_harness::{InjectionSession, StrategyConfig};
use oom_sim::{Command, Database, RandomLaw, SimInjector, Status};
use proptest::prelude::*;

/// Open, run the DDL/DML chain while the status is Ok, close
fn chain(heap: &oom_sim::SimHeap) -> Status {
    let Ok(mut db) = Database::open(heap) else {
        return Status::NoMem;
    };
    let commands = [
        Command::create_table("t", "a", &["b", "c"]),
        Command::create_index("t_idx", "t", &["a", "b", "c"]),
        Command::insert_ints("t", &[&[1, 2], &[3, 4], &[5, 6]]),
        Command::drop_index("t_idx"),
        Command::drop_table("t"),
        Command::Vacuum,
    ];
    let mut status = Status::Ok;
    for command in &commands {
        status = db.execute(command);
        if status != Status::Ok {
            break;
        }
    }
    assert_eq!(db.close(), Status::Ok);
    status
}

#[test]
fn step_sweep_reaches_success_without_leaks() {
    let mut delay = 0;
    let mut failures = 0;
    loop {
        let injector = SimInjector::new();
        let heap = injector.heap();
        let mut session =
            InjectionSession::new(injector.clone(), injector.config(), StrategyConfig::step(delay))
                .unwrap();
        session.activate().unwrap();
        let status = chain(&heap);
        session.finish().unwrap();
        if status == Status::Ok {
            break;
        }
        assert_eq!(status, Status::NoMem);
        failures += 1;
        delay += 1;
        assert!(delay < 1_000, "chain never completed");
    }
    assert!(failures > 0);
}

proptest! {
    #[test]
    fn random_failures_never_leak(seed in any::<u32>(), duty_cycle in 1u32..6) {
        let injector = SimInjector::with_law(RandomLaw::Independent);
        let heap = injector.heap();
        let mut session = InjectionSession::new(
            injector.clone(),
            injector.config(),
            StrategyConfig::random(duty_cycle).with_seed(seed),
        )
        .unwrap();
        session.activate().unwrap();
        let status = chain(&heap);
        prop_assert!(status == Status::Ok || status == Status::NoMem);
        prop_assert!(session.finish().is_ok());
        prop_assert_eq!(injector.live_blocks(), 0);
    }
}
