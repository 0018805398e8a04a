//! Injector entry points
//!
//! The injector is consumed through four capabilities. [`Injector`] is the
//! typed seam sessions are built on; [`CapabilityTable`] is the loosely bound
//! form (each entry point may be absent) that is resolved once at startup.

use crate::error::CapabilityError;
use std::fmt;

/// The allocation-failure injector as seen by a session
pub trait Injector {
    /// Arm fault injection with the currently configured strategy
    fn activate(&mut self);

    /// Disarm fault injection; returns allocations still live from the activation
    fn deactivate(&mut self) -> u32;

    /// Disarm injection. `0` means until resumed, `n > 0` means for the next
    /// `n` allocation events, after which the injector rearms itself
    fn pause(&mut self, duration: u32);

    /// Rearm immediately, ending any pause early
    fn resume(&mut self);

    /// Allocation events left in the current budget pause, `Some(0)` once it
    /// has run out and the injector rearmed itself. `None` when unknown.
    fn budget_remaining(&self) -> Option<u32> {
        None
    }
}

impl<T: Injector + ?Sized> Injector for &mut T {
    fn activate(&mut self) {
        (**self).activate();
    }

    fn deactivate(&mut self) -> u32 {
        (**self).deactivate()
    }

    fn pause(&mut self, duration: u32) {
        (**self).pause(duration);
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn budget_remaining(&self) -> Option<u32> {
        (**self).budget_remaining()
    }
}

impl<T: Injector + ?Sized> Injector for Box<T> {
    fn activate(&mut self) {
        (**self).activate();
    }

    fn deactivate(&mut self) -> u32 {
        (**self).deactivate()
    }

    fn pause(&mut self, duration: u32) {
        (**self).pause(duration);
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn budget_remaining(&self) -> Option<u32> {
        (**self).budget_remaining()
    }
}

/// One injector entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `activate()`
    Activate,
    /// `deactivate() -> leaks`
    Deactivate,
    /// `pause(duration)`
    Pause,
    /// `resume()`
    Resume,
}

impl Capability {
    /// All capabilities, in declaration order
    pub const ALL: [Capability; 4] = [
        Capability::Activate,
        Capability::Deactivate,
        Capability::Pause,
        Capability::Resume,
    ];

    /// Entry point name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type ActivateFn = Box<dyn FnMut() + Send>;
type DeactivateFn = Box<dyn FnMut() -> u32 + Send>;
type PauseFn = Box<dyn FnMut(u32) + Send>;
type ResumeFn = Box<dyn FnMut() + Send>;
type RemainingFn = Box<dyn Fn() -> Option<u32> + Send>;

/// Entry points as discovered at startup, any of which may be missing
///
/// The budget query is optional and never reported as missing.
#[derive(Default)]
pub struct CapabilityTable {
    activate: Option<ActivateFn>,
    deactivate: Option<DeactivateFn>,
    pause: Option<PauseFn>,
    resume: Option<ResumeFn>,
    remaining: Option<RemainingFn>,
}

impl CapabilityTable {
    /// Table with no entry points bound
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bind `activate`
    #[must_use]
    pub fn with_activate(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.activate = Some(Box::new(f));
        self
    }

    /// Bind `deactivate`
    #[must_use]
    pub fn with_deactivate(mut self, f: impl FnMut() -> u32 + Send + 'static) -> Self {
        self.deactivate = Some(Box::new(f));
        self
    }

    /// Bind `pause`
    #[must_use]
    pub fn with_pause(mut self, f: impl FnMut(u32) + Send + 'static) -> Self {
        self.pause = Some(Box::new(f));
        self
    }

    /// Bind `resume`
    #[must_use]
    pub fn with_resume(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.resume = Some(Box::new(f));
        self
    }

    /// Bind the optional budget query
    #[must_use]
    pub fn with_budget_remaining(mut self, f: impl Fn() -> Option<u32> + Send + 'static) -> Self {
        self.remaining = Some(Box::new(f));
        self
    }

    /// Capabilities that are not bound
    #[must_use]
    pub fn missing(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| match c {
                Capability::Activate => self.activate.is_none(),
                Capability::Deactivate => self.deactivate.is_none(),
                Capability::Pause => self.pause.is_none(),
                Capability::Resume => self.resume.is_none(),
            })
            .collect()
    }

    /// Validate that all four entry points are present
    ///
    /// # Errors
    /// [`CapabilityError::Missing`] naming every absent entry point.
    pub fn resolve(self) -> Result<ResolvedInjector, CapabilityError> {
        match (self.activate, self.deactivate, self.pause, self.resume) {
            (Some(activate), Some(deactivate), Some(pause), Some(resume)) => Ok(ResolvedInjector {
                activate,
                deactivate,
                pause,
                resume,
                remaining: self.remaining,
            }),
            (activate, deactivate, pause, resume) => {
                let present = [
                    activate.is_some(),
                    deactivate.is_some(),
                    pause.is_some(),
                    resume.is_some(),
                ];
                let missing = Capability::ALL
                    .into_iter()
                    .zip(present)
                    .filter(|(_, bound)| !bound)
                    .map(|(c, _)| c)
                    .collect();
                Err(CapabilityError::Missing { missing })
            }
        }
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("missing", &self.missing())
            .finish()
    }
}

/// A table with every entry point present
pub struct ResolvedInjector {
    activate: ActivateFn,
    deactivate: DeactivateFn,
    pause: PauseFn,
    resume: ResumeFn,
    remaining: Option<RemainingFn>,
}

impl Injector for ResolvedInjector {
    fn activate(&mut self) {
        (self.activate)();
    }

    fn deactivate(&mut self) -> u32 {
        (self.deactivate)()
    }

    fn pause(&mut self, duration: u32) {
        (self.pause)(duration);
    }

    fn resume(&mut self) {
        (self.resume)();
    }

    fn budget_remaining(&self) -> Option<u32> {
        self.remaining.as_ref().and_then(|remaining| remaining())
    }
}

impl fmt::Debug for ResolvedInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedInjector").finish_non_exhaustive()
    }
}
