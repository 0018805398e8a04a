//! Failure strategies and the configurator that applies them

use super::{ConfigKey, ConfigSink};
use crate::error::ConfigError;

/// Strategy selector values understood by the injector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StrategyKind {
    /// Probabilistic failures
    Random = 0,
    /// One deterministic failure
    Step = 1,
}

impl StrategyKind {
    /// Value written under [`ConfigKey::Strategy`]
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Selector for a configured code
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Random),
            1 => Some(Self::Step),
            _ => None,
        }
    }
}

/// Failure pattern for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyConfig {
    /// Write nothing and leave the injector's built-in defaults in force
    #[default]
    Default,

    /// Each armed allocation fails with roughly `1 / duty_cycle` odds; the
    /// exact law is the injector's
    Random {
        /// Failure frequency parameter, at least 1
        duty_cycle: u32,
        /// Optional seed for reproducible runs
        seed: Option<u32>,
    },

    /// The `delay`-th allocation after the injector last became armed fails
    Step {
        /// Zero-based index of the failing allocation
        delay: u32,
    },
}

impl StrategyConfig {
    /// Unseeded random strategy
    #[inline]
    #[must_use]
    pub fn random(duty_cycle: u32) -> Self {
        Self::Random {
            duty_cycle,
            seed: None,
        }
    }

    /// Step strategy
    #[inline]
    #[must_use]
    pub fn step(delay: u32) -> Self {
        Self::Step { delay }
    }

    /// Attach a seed; no effect on non-random strategies
    #[must_use]
    pub fn with_seed(self, seed: u32) -> Self {
        match self {
            Self::Random { duty_cycle, .. } => Self::Random {
                duty_cycle,
                seed: Some(seed),
            },
            other => other,
        }
    }

    /// Selector written for this strategy, `None` for [`StrategyConfig::Default`]
    #[must_use]
    pub fn kind(&self) -> Option<StrategyKind> {
        match self {
            Self::Default => None,
            Self::Random { .. } => Some(StrategyKind::Random),
            Self::Step { .. } => Some(StrategyKind::Step),
        }
    }

    /// Check parameter ranges
    ///
    /// # Errors
    /// [`ConfigError::InvalidParameter`] for a zero duty cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Random { duty_cycle: 0, .. } => Err(ConfigError::InvalidParameter {
                parameter: "duty_cycle",
                reason: "must be at least 1",
            }),
            _ => Ok(()),
        }
    }

    fn entries(&self) -> Vec<(ConfigKey, u32)> {
        let mut entries = Vec::with_capacity(3);
        if let Some(kind) = self.kind() {
            entries.push((ConfigKey::Strategy, kind.code()));
        }
        match *self {
            Self::Default => {}
            Self::Random { duty_cycle, seed } => {
                if let Some(seed) = seed {
                    entries.push((ConfigKey::Seed, seed));
                }
                entries.push((ConfigKey::DutyCycle, duty_cycle));
            }
            Self::Step { delay } => entries.push((ConfigKey::Delay, delay)),
        }
        entries
    }
}

/// Writes a [`StrategyConfig`] into a [`ConfigSink`] and clears it afterwards
#[derive(Debug)]
pub struct StrategyConfigurator<C> {
    sink: C,
    applied: Option<StrategyConfig>,
}

impl<C: ConfigSink> StrategyConfigurator<C> {
    /// Configurator over `sink`; nothing is written yet
    pub fn new(sink: C) -> Self {
        Self {
            sink,
            applied: None,
        }
    }

    /// Write `strategy`, starting from a clean slate
    ///
    /// # Errors
    /// [`ConfigError::AlreadyConfigured`] if a strategy is applied and not
    /// cleared, otherwise validation or sink write failures.
    pub fn configure(&mut self, strategy: StrategyConfig) -> Result<(), ConfigError> {
        if self.applied.is_some() {
            return Err(ConfigError::AlreadyConfigured);
        }
        strategy.validate()?;
        self.unset_all()?;
        for (key, value) in strategy.entries() {
            self.sink.set(key, value)?;
        }
        tracing::debug!(?strategy, "strategy configured");
        self.applied = Some(strategy);
        Ok(())
    }

    /// Remove every configuration key
    ///
    /// # Errors
    /// The first sink failure; remaining keys are still attempted.
    pub fn clear(&mut self) -> Result<(), ConfigError> {
        let result = self.unset_all();
        if self.applied.take().is_some() {
            tracing::debug!("strategy cleared");
        }
        result
    }

    /// Currently applied strategy
    #[must_use]
    pub fn applied(&self) -> Option<StrategyConfig> {
        self.applied
    }

    /// Underlying sink
    pub fn sink(&self) -> &C {
        &self.sink
    }

    fn unset_all(&mut self) -> Result<(), ConfigError> {
        let mut first = None;
        for key in ConfigKey::ALL {
            if let Err(err) = self.sink.unset(key) {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
