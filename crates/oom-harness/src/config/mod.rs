//! Injector configuration surface
//!
//! The injector reads its strategy from process-wide settings at activation.
//! Writes go through a [`ConfigSink`] so sessions never touch ambient state
//! directly: [`EnvConfig`] targets the process environment of a preloaded
//! injector, [`MemoryConfig`] keeps the values in an explicit map.

mod strategy;

pub use strategy::{StrategyConfig, StrategyConfigurator, StrategyKind};

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::fmt;

/// A configuration field consumed by the injector at activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    /// Strategy selector (see [`StrategyKind`])
    Strategy,
    /// Seed for the random strategy
    Seed,
    /// Random strategy failure frequency
    DutyCycle,
    /// Step strategy failure index
    Delay,
    /// Default pause duration
    Duration,
}

impl ConfigKey {
    /// Every key, in declaration order
    pub const ALL: [ConfigKey; 5] = [
        ConfigKey::Strategy,
        ConfigKey::Seed,
        ConfigKey::DutyCycle,
        ConfigKey::Delay,
        ConfigKey::Duration,
    ];

    /// Conventional environment variable name
    #[must_use]
    pub fn env_name(self) -> &'static str {
        match self {
            Self::Strategy => "OVERTHROWER_STRATEGY",
            Self::Seed => "OVERTHROWER_SEED",
            Self::DutyCycle => "OVERTHROWER_DUTY_CYCLE",
            Self::Delay => "OVERTHROWER_DELAY",
            Self::Duration => "OVERTHROWER_DURATION",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_name())
    }
}

/// Destination for injector configuration writes
pub trait ConfigSink {
    /// Set `key` to `value`
    ///
    /// # Errors
    /// [`ConfigError::WriteFailed`] if the value cannot be stored.
    fn set(&mut self, key: ConfigKey, value: u32) -> Result<(), ConfigError>;

    /// Remove `key`; removing an absent key succeeds
    ///
    /// # Errors
    /// [`ConfigError::WriteFailed`] if the key cannot be removed.
    fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError>;
}

impl<T: ConfigSink + ?Sized> ConfigSink for &mut T {
    fn set(&mut self, key: ConfigKey, value: u32) -> Result<(), ConfigError> {
        (**self).set(key, value)
    }

    fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        (**self).unset(key)
    }
}

impl<T: ConfigSink + ?Sized> ConfigSink for Box<T> {
    fn set(&mut self, key: ConfigKey, value: u32) -> Result<(), ConfigError> {
        (**self).set(key, value)
    }

    fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        (**self).unset(key)
    }
}

/// Writes configuration into the process environment
///
/// Only one session per process may use this sink at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl EnvConfig {
    /// Current value of `key`, if set and numeric
    #[must_use]
    pub fn get(key: ConfigKey) -> Option<u32> {
        std::env::var(key.env_name()).ok()?.parse().ok()
    }
}

impl ConfigSink for EnvConfig {
    fn set(&mut self, key: ConfigKey, value: u32) -> Result<(), ConfigError> {
        std::env::set_var(key.env_name(), value.to_string());
        match Self::get(key) {
            Some(stored) if stored == value => Ok(()),
            _ => Err(ConfigError::WriteFailed {
                key,
                reason: "value did not read back".to_string(),
            }),
        }
    }

    fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        std::env::remove_var(key.env_name());
        if std::env::var_os(key.env_name()).is_some() {
            return Err(ConfigError::WriteFailed {
                key,
                reason: "variable still present".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration held in an explicit map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfig {
    values: BTreeMap<ConfigKey, u32>,
}

impl MemoryConfig {
    /// Empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`
    #[must_use]
    pub fn get(&self, key: ConfigKey) -> Option<u32> {
        self.values.get(&key).copied()
    }

    /// True when no key is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigSink for MemoryConfig {
    fn set(&mut self, key: ConfigKey, value: u32) -> Result<(), ConfigError> {
        self.values.insert(key, value);
        Ok(())
    }

    fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        self.values.remove(&key);
        Ok(())
    }
}
