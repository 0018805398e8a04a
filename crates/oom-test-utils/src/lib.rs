//! Testing utilities for the OOM harness workspace
//!
//! Shared session builders, stand-in operations and a call-recording injector.

#![allow(missing_docs)]

use oom_harness::{Attempt, ConfigSink, InjectionSession, Injector, StrategyConfig};
use oom_sim::{SimConfig, SimHeap, SimInjector, Status};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::layer::{Context, Layer};

pub type SimSession = InjectionSession<SimInjector, SimConfig>;

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Layer recording every event emitted while `sim` is armed
///
/// The simulator's own events are skipped; it logs under its state lock.
#[derive(Debug, Clone)]
pub struct ArmedEventRecorder {
    sim: SimInjector,
    events: Arc<Mutex<Vec<String>>>,
}

impl ArmedEventRecorder {
    pub fn new(sim: SimInjector) -> Self {
        Self {
            sim,
            events: Arc::default(),
        }
    }

    /// `target: name` of each event seen while armed
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl<S: tracing::Subscriber> Layer<S> for ArmedEventRecorder {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with("oom_sim") {
            return;
        }
        if self.sim.is_armed() {
            self.events
                .lock()
                .push(format!("{}: {}", meta.target(), meta.name()));
        }
    }
}

/// Inactive session over a fresh simulator
pub fn sim_session(strategy: StrategyConfig) -> (SimInjector, SimSession) {
    let injector = SimInjector::new();
    let session = InjectionSession::new(injector.clone(), injector.config(), strategy).unwrap();
    (injector, session)
}

/// Active session over a fresh simulator
pub fn active_sim_session(strategy: StrategyConfig) -> (SimInjector, SimSession) {
    let (injector, mut session) = sim_session(strategy);
    session.activate().unwrap();
    (injector, session)
}

/// Idempotent, side-effect-free operation making a fixed number of allocations
#[derive(Debug, Clone)]
pub struct CountingOperation {
    heap: SimHeap,
    allocations: usize,
    pub calls: u32,
    pub recoveries: u32,
}

impl CountingOperation {
    pub fn new(heap: SimHeap, allocations: usize) -> Self {
        Self {
            heap,
            allocations,
            calls: 0,
            recoveries: 0,
        }
    }
}

impl<I: Injector, C: ConfigSink> Attempt<I, C> for CountingOperation {
    type Status = Status;

    fn attempt(&mut self, _session: &mut InjectionSession<I, C>) -> Status {
        self.calls += 1;
        match self.heap.allocate_many(self.allocations, 16) {
            Ok(_) => Status::Ok,
            Err(_) => Status::NoMem,
        }
    }

    fn recover(&mut self, _session: &mut InjectionSession<I, C>, _status: &Status) {
        self.recoveries += 1;
    }
}

/// Operation that forgets its first block when the second allocation fails
#[derive(Debug, Clone)]
pub struct LeakyOperation {
    heap: SimHeap,
    pub leaked: u32,
}

impl LeakyOperation {
    pub fn new(heap: SimHeap) -> Self {
        Self { heap, leaked: 0 }
    }

    pub fn run(&mut self) -> Status {
        let Ok(first) = self.heap.allocate(32) else {
            return Status::NoMem;
        };
        match self.heap.allocate(32) {
            Ok(_second) => Status::Ok,
            Err(_) => {
                std::mem::forget(first);
                self.leaked += 1;
                Status::NoMem
            }
        }
    }
}

impl<I: Injector, C: ConfigSink> Attempt<I, C> for LeakyOperation {
    type Status = Status;

    fn attempt(&mut self, _session: &mut InjectionSession<I, C>) -> Status {
        self.run()
    }
}

/// One injector entry point invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Activate,
    Deactivate,
    Pause(u32),
    Resume,
}

/// Injector that records every call and reports a fixed leak count
#[derive(Debug, Clone, Default)]
pub struct RecordingInjector {
    calls: Arc<Mutex<Vec<Call>>>,
    leaks: u32,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaking(leaks: u32) -> Self {
        Self {
            leaks,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn pauses(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Pause(_))).count()
    }

    pub fn resumes(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Resume).count()
    }

    /// Replaying the calls leaves the injector armed
    pub fn is_balanced(&self) -> bool {
        self.calls().iter().fold(true, |armed, call| match call {
            Call::Pause(_) => false,
            Call::Resume => true,
            Call::Activate | Call::Deactivate => armed,
        })
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl Injector for RecordingInjector {
    fn activate(&mut self) {
        self.calls.lock().push(Call::Activate);
    }

    fn deactivate(&mut self) -> u32 {
        self.calls.lock().push(Call::Deactivate);
        self.leaks
    }

    fn pause(&mut self, duration: u32) {
        self.calls.lock().push(Call::Pause(duration));
    }

    fn resume(&mut self) {
        self.calls.lock().push(Call::Resume);
    }
}
