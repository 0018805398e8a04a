//! OOM Scenarios - resistance scenarios and their driver
//!
//! Composes the harness with the simulated engine:
//! - [`scenario::open_close`]: open/close under default and step strategies
//! - [`scenario::resistance`]: full engine surface under a random strategy
//! - [`settings`]: TOML driver settings
//! - [`logging`]: subscriber bootstrap for the binary

#![warn(unreachable_pub)]

pub mod logging;
pub mod scenario;
pub mod settings;

pub use scenario::{EnvSession, Environment, ScenarioReport};
pub use settings::{HarnessSettings, OpenCloseSettings, ResistanceSettings, SettingsError};

/// Diagnostic printed when the injector cannot be resolved at startup
pub const INJECTOR_UNAVAILABLE: &str = "injector has not been injected or is not fully available";
