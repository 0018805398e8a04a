//! OOM Harness - allocation-failure resistance testing
//!
//! Drives an allocation-failure injector around a library under test:
//! - Applies a failure strategy through a configuration sink
//! - Activates and deactivates injection, reporting leaked allocations
//! - Keeps pause/resume nesting-safe through scoped guards
//! - Escalates retries until an operation reaches its target outcome
//!
//! # Example
//!
//! ```rust,ignore
//! use oom_harness::prelude::*;
//!
//! let mut session = InjectionSession::new(injector, MemoryConfig::new(), StrategyConfig::step(0))?;
//! session.activate()?;
//! let outcome = Escalation::until(Status::Ok).retry(&mut session, |s| db.execute(s, "..."))?;
//! oom_safe_assert!(session, outcome.reached_target);
//! session.finish()?;
//! ```

#![warn(unreachable_pub)]

pub mod capability;
pub mod config;
pub mod error;
pub mod escalation;
pub mod guard;
pub mod pause;
pub mod session;

mod assert;

pub use capability::{Capability, CapabilityTable, Injector, ResolvedInjector};
pub use config::{
    ConfigKey, ConfigSink, EnvConfig, MemoryConfig, StrategyConfig, StrategyConfigurator,
    StrategyKind,
};
pub use error::{CapabilityError, ConfigError, HarnessError, ProtocolError, Result};
pub use escalation::{Attempt, AttemptRecord, Escalated, Escalation, Mode};
pub use guard::SuspensionGuard;
pub use pause::{PauseRequest, PauseStack, Suspension};
pub use session::{InjectionSession, LeakCount, SessionState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for writing resistance scenarios
    pub use crate::{
        oom_safe_assert, oom_safe_assert_eq, oom_safe_assert_ne, Attempt, ConfigSink, Escalated,
        Escalation, HarnessError, InjectionSession, Injector, LeakCount, MemoryConfig,
        PauseRequest, StrategyConfig, Suspension, SuspensionGuard,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub(crate) mod mock {
    mockall::mock! {
        pub Injector {}

        impl crate::capability::Injector for Injector {
            fn activate(&mut self);
            fn deactivate(&mut self) -> u32;
            fn pause(&mut self, duration: u32);
            fn resume(&mut self);
        }
    }
}
