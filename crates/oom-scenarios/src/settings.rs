//! Driver settings
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file is valid. Command-line flags override file values.

use oom_sim::RandomLaw;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings TOML
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: &'static str,
    },
}

/// Open/close scenario settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenCloseSettings {
    /// Sessions under the injector's default strategy
    pub iterations: u32,
}

impl Default for OpenCloseSettings {
    fn default() -> Self {
        Self { iterations: 100 }
    }
}

/// Resistance scenario settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResistanceSettings {
    /// Rows inserted per phase
    pub rows: u32,
    /// Random strategy duty cycle
    pub duty_cycle: u32,
    /// Random strategy seed
    pub seed: Option<u32>,
    /// Random strategy law of the simulated injector
    pub law: RandomLaw,
}

impl Default for ResistanceSettings {
    fn default() -> Self {
        Self {
            rows: 100,
            duty_cycle: 2,
            seed: None,
            law: RandomLaw::Independent,
        }
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessSettings {
    /// Filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Bound on escalation attempts; unbounded when absent
    pub max_attempts: Option<u32>,
    /// Open/close scenario
    pub open_close: OpenCloseSettings,
    /// Resistance scenario
    pub resistance: ResistanceSettings,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            max_attempts: None,
            open_close: OpenCloseSettings::default(),
            resistance: ResistanceSettings::default(),
        }
    }
}

impl HarnessSettings {
    /// Read and validate a settings file
    ///
    /// # Errors
    /// I/O, parse or validation failures.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate settings TOML
    ///
    /// # Errors
    /// Parse or validation failures.
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`SettingsError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.resistance.duty_cycle == 0 {
            return Err(SettingsError::Invalid {
                field: "resistance.duty_cycle",
                reason: "must be at least 1",
            });
        }
        if self.max_attempts == Some(0) {
            return Err(SettingsError::Invalid {
                field: "max_attempts",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Parse a random law name as accepted on the command line
#[must_use]
pub fn parse_law(name: &str) -> Option<RandomLaw> {
    match name {
        "independent" => Some(RandomLaw::Independent),
        "periodic" => Some(RandomLaw::Periodic),
        _ => None,
    }
}
