//! Simulated allocation-failure injector
//!
//! Provides the four injector entry points and the configuration surface over
//! shared state that [`SimHeap`](crate::heap::SimHeap) consults on every
//! allocation. All handles ([`SimInjector`], [`SimConfig`], `SimHeap`) are
//! cheap clones of one `Arc<Mutex<..>>`.

use crate::heap::{OutOfMemory, SimHeap};
use oom_harness::{CapabilityTable, ConfigError, ConfigKey, ConfigSink, Injector, StrategyKind};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Duty cycle used when no strategy is configured
pub const DEFAULT_DUTY_CYCLE: u32 = 1024;

/// How the random strategy turns a duty cycle into failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomLaw {
    /// Each armed allocation fails with probability `1 / duty_cycle`
    #[default]
    Independent,
    /// Every `duty_cycle`-th armed allocation fails
    Periodic,
}

/// Simulator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimStats {
    /// Allocation events, failed ones included
    pub allocations: u64,
    /// Injected failures
    pub failures: u64,
    /// Blocks released
    pub frees: u64,
    /// Activations performed
    pub activations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseState {
    Armed,
    Forever,
    Budget(u32),
}

#[derive(Debug)]
enum Plan {
    Step {
        delay: u64,
    },
    Random {
        duty_cycle: u32,
        law: RandomLaw,
        rng: StdRng,
        counter: u64,
    },
}

impl Plan {
    fn from_config(config: &BTreeMap<ConfigKey, u32>, law: RandomLaw) -> Self {
        let random = || {
            let duty_cycle = config
                .get(&ConfigKey::DutyCycle)
                .copied()
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_DUTY_CYCLE);
            let rng = match config.get(&ConfigKey::Seed) {
                Some(seed) => StdRng::seed_from_u64(u64::from(*seed)),
                None => StdRng::from_entropy(),
            };
            Plan::Random {
                duty_cycle,
                law,
                rng,
                counter: 0,
            }
        };

        match config.get(&ConfigKey::Strategy).copied() {
            None => random(),
            Some(code) => match StrategyKind::from_code(code) {
                Some(StrategyKind::Random) => random(),
                Some(StrategyKind::Step) => Plan::Step {
                    delay: u64::from(config.get(&ConfigKey::Delay).copied().unwrap_or(0)),
                },
                None => {
                    tracing::warn!(code, "unknown strategy code, using defaults");
                    random()
                }
            },
        }
    }

    /// Decide the fate of the `index`-th armed allocation since arming
    fn fails(&mut self, index: u64) -> bool {
        match self {
            Plan::Step { delay } => index == *delay,
            Plan::Random {
                duty_cycle,
                law: RandomLaw::Independent,
                rng,
                ..
            } => rng.gen_ratio(1, *duty_cycle),
            Plan::Random {
                duty_cycle,
                law: RandomLaw::Periodic,
                counter,
                ..
            } => {
                *counter += 1;
                *counter % u64::from(*duty_cycle) == 0
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    config: BTreeMap<ConfigKey, u32>,
    law: RandomLaw,
    active: bool,
    epoch: u64,
    pause: PauseState,
    plan: Option<Plan>,
    armed_events: u64,
    epoch_live: u32,
    live: usize,
    stats: SimStats,
}

impl Shared {
    fn new(law: RandomLaw) -> Self {
        Self {
            config: BTreeMap::new(),
            law,
            active: false,
            epoch: 0,
            pause: PauseState::Armed,
            plan: None,
            armed_events: 0,
            epoch_live: 0,
            live: 0,
            stats: SimStats::default(),
        }
    }

    fn activate(&mut self) {
        let plan = Plan::from_config(&self.config, self.law);
        tracing::debug!(?plan, "simulated injector activated");
        self.plan = Some(plan);
        self.active = true;
        self.epoch += 1;
        self.armed_events = 0;
        self.epoch_live = 0;
        self.stats.activations += 1;
    }

    fn deactivate(&mut self) -> u32 {
        let leaked = self.epoch_live;
        self.active = false;
        self.plan = None;
        self.pause = PauseState::Armed;
        self.epoch_live = 0;
        tracing::debug!(leaked, "simulated injector deactivated");
        leaked
    }

    fn pause(&mut self, duration: u32) {
        self.pause = match duration {
            0 => PauseState::Forever,
            n => PauseState::Budget(n),
        };
    }

    fn rearm(&mut self) {
        self.pause = PauseState::Armed;
        self.armed_events = 0;
    }

    fn budget_remaining(&self) -> Option<u32> {
        match self.pause {
            _ if !self.active => None,
            PauseState::Armed => Some(0),
            PauseState::Budget(n) => Some(n),
            PauseState::Forever => None,
        }
    }

    /// Account for one allocation; `Ok` carries the activation epoch the
    /// block belongs to, if any
    pub(crate) fn allocate(&mut self, size: usize) -> Result<Option<u64>, OutOfMemory> {
        self.stats.allocations += 1;
        if !self.active {
            self.live += 1;
            return Ok(None);
        }
        match self.pause {
            PauseState::Forever => {}
            PauseState::Budget(n) if n <= 1 => self.rearm(),
            PauseState::Budget(n) => self.pause = PauseState::Budget(n - 1),
            PauseState::Armed => {
                let index = self.armed_events;
                self.armed_events += 1;
                if self.plan.as_mut().is_some_and(|plan| plan.fails(index)) {
                    self.stats.failures += 1;
                    return Err(OutOfMemory { size });
                }
            }
        }
        self.live += 1;
        self.epoch_live += 1;
        Ok(Some(self.epoch))
    }

    pub(crate) fn free(&mut self, epoch: Option<u64>) {
        self.live = self.live.saturating_sub(1);
        self.stats.frees += 1;
        if self.active && epoch == Some(self.epoch) {
            self.epoch_live = self.epoch_live.saturating_sub(1);
        }
    }
}

/// Handle to the simulated injector
#[derive(Debug, Clone)]
pub struct SimInjector {
    shared: Arc<Mutex<Shared>>,
}

impl Default for SimInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl SimInjector {
    /// Fresh injector using the independent random law
    #[must_use]
    pub fn new() -> Self {
        Self::with_law(RandomLaw::default())
    }

    /// Fresh injector with an explicit random law
    #[must_use]
    pub fn with_law(law: RandomLaw) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::new(law))),
        }
    }

    /// Change the random law; takes effect at the next activation
    pub fn set_law(&self, law: RandomLaw) {
        self.shared.lock().law = law;
    }

    /// Configuration sink read at activation
    #[must_use]
    pub fn config(&self) -> SimConfig {
        SimConfig {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Heap whose allocations this injector may fail
    #[must_use]
    pub fn heap(&self) -> SimHeap {
        SimHeap::new(Arc::clone(&self.shared))
    }

    /// The four entry points as a loosely bound table
    #[must_use]
    pub fn capabilities(&self) -> CapabilityTable {
        let activate = self.clone();
        let deactivate = self.clone();
        let pause = self.clone();
        let resume = self.clone();
        let remaining = self.clone();
        CapabilityTable::empty()
            .with_activate(move || activate.shared.lock().activate())
            .with_deactivate(move || deactivate.shared.lock().deactivate())
            .with_pause(move |duration| pause.shared.lock().pause(duration))
            .with_resume(move || resume.shared.lock().rearm())
            .with_budget_remaining(move || remaining.shared.lock().budget_remaining())
    }

    /// Counters since creation
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.shared.lock().stats
    }

    /// True between activation and deactivation
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    /// True when the next allocation may be failed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        let shared = self.shared.lock();
        shared.active && shared.pause == PauseState::Armed
    }

    /// Blocks currently allocated, regardless of epoch
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.shared.lock().live
    }
}

impl Injector for SimInjector {
    fn activate(&mut self) {
        self.shared.lock().activate();
    }

    fn deactivate(&mut self) -> u32 {
        self.shared.lock().deactivate()
    }

    fn pause(&mut self, duration: u32) {
        self.shared.lock().pause(duration);
    }

    fn resume(&mut self) {
        self.shared.lock().rearm();
    }

    fn budget_remaining(&self) -> Option<u32> {
        self.shared.lock().budget_remaining()
    }
}

/// Configuration sink of a [`SimInjector`]
#[derive(Debug, Clone)]
pub struct SimConfig {
    shared: Arc<Mutex<Shared>>,
}

impl SimConfig {
    /// Current value of `key`
    #[must_use]
    pub fn get(&self, key: ConfigKey) -> Option<u32> {
        self.shared.lock().config.get(&key).copied()
    }

    /// True when no key is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().config.is_empty()
    }
}

impl ConfigSink for SimConfig {
    fn set(&mut self, key: ConfigKey, value: u32) -> Result<(), ConfigError> {
        let mut shared = self.shared.lock();
        if shared.active {
            return Err(ConfigError::WriteFailed {
                key,
                reason: "injector is active".to_string(),
            });
        }
        shared.config.insert(key, value);
        Ok(())
    }

    fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        self.shared.lock().config.remove(&key);
        Ok(())
    }
}
