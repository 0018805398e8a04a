//! OOM Sim - simulated collaborators for the OOM harness
//!
//! - [`SimInjector`]: the four injector entry points plus a configuration sink
//! - [`SimHeap`]: allocations the injector can fail, with leak accounting
//! - [`engine`]: a small relational engine that allocates through the heap
//!
//! # Example
//!
//! ```rust,ignore
//! use oom_harness::{InjectionSession, StrategyConfig};
//! use oom_sim::{Database, SimInjector};
//!
//! let injector = SimInjector::new();
//! let heap = injector.heap();
//! let mut session = InjectionSession::new(injector.clone(), injector.config(), StrategyConfig::step(0))?;
//! session.activate()?;
//! assert!(Database::open(&heap).is_err());
//! session.finish()?;
//! ```

#![warn(unreachable_pub)]

pub mod engine;
pub mod heap;
pub mod injector;

pub use engine::{Command, Database, Statement, Status, Value};
pub use heap::{Block, OutOfMemory, SimHeap};
pub use injector::{RandomLaw, SimConfig, SimInjector, SimStats, DEFAULT_DUTY_CYCLE};
