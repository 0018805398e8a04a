//! Error types for the OOM harness
//!
//! Provides error handling for:
//! - Pause/resume and activation protocol violations
//! - Injector configuration failures
//! - Missing injector capabilities at startup
//! - Leak detection and escalation exhaustion

use crate::capability::Capability;
use crate::config::ConfigKey;

/// Main harness error type
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Pause/resume or activation protocol misuse
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Strategy configuration could not be applied
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Injector entry points are unavailable
    #[error("injector unavailable: {0}")]
    Capability(#[from] CapabilityError),

    /// Allocations made during activation were never released
    #[error("{count} allocation(s) leaked while the injector was active")]
    Leaked {
        /// Blocks still live at deactivation
        count: u32,
    },

    /// A bounded escalation never observed its target outcome
    #[error("target outcome not reached after {attempts} attempt(s), last status: {last_status}")]
    EscalationExhausted {
        /// Attempts performed
        attempts: u32,
        /// Debug rendering of the final status
        last_status: String,
    },
}

impl HarnessError {
    /// Programmer, configuration or startup errors; never worth retrying
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Config(_) | Self::Capability(_)
        )
    }

    /// Defects in the library under test, reported as test failures
    #[inline]
    #[must_use]
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Self::Leaked { .. } | Self::EscalationExhausted { .. })
    }
}

/// Violations of the activation and pause/resume protocol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// `activate()` while already active
    #[error("session is already active")]
    AlreadyActive,

    /// `deactivate()` while inactive
    #[error("session is not active")]
    NotActive,

    /// `resume()` with an empty pause stack
    #[error("resume without a matching pause")]
    ResumeWithoutPause,

    /// Manual `resume()` attempted to pop a guard-owned pause
    #[error("resume would close a pause owned by a guard")]
    ResumeCrossesGuard,

    /// Deactivation or teardown with pauses still open
    #[error("{depth} pause scope(s) still open")]
    PausesOutstanding {
        /// Open pause scopes
        depth: usize,
    },
}

/// Strategy configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A strategy parameter is out of range
    #[error("invalid {parameter}: {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: &'static str,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The configuration sink refused a write
    #[error("failed to write {key}: {reason}")]
    WriteFailed {
        /// Key being written
        key: ConfigKey,
        /// Underlying failure
        reason: String,
    },

    /// A strategy is already applied and must be cleared first
    #[error("a strategy is already configured")]
    AlreadyConfigured,
}

/// Injector capability resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// One or more entry points are absent
    #[error("missing entry point(s): {}", join(missing))]
    Missing {
        /// Every absent capability, in declaration order
        missing: Vec<Capability>,
    },
}

fn join(missing: &[Capability]) -> String {
    missing
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Harness result alias
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
