//! Scoped suspension guard
//!
//! A guard opens one pause scope on construction and closes exactly that
//! scope on drop, on every exit path including unwinding from a failed
//! assertion. The guard mutably borrows its session, so nested guards borrow
//! the outer guard and scopes are closed in strict LIFO order.

use crate::capability::Injector;
use crate::config::ConfigSink;
use crate::pause::{PauseRequest, Suspension};
use crate::session::InjectionSession;
use std::ops::{Deref, DerefMut};

/// RAII pause scope over an [`InjectionSession`]
#[must_use = "the pause scope closes as soon as the guard is dropped"]
pub struct SuspensionGuard<'s, I: Injector, C: ConfigSink> {
    session: &'s mut InjectionSession<I, C>,
    depth: usize,
    suspension: Suspension,
}

impl<'s, I: Injector, C: ConfigSink> SuspensionGuard<'s, I, C> {
    pub(crate) fn open(session: &'s mut InjectionSession<I, C>, request: PauseRequest) -> Self {
        let (depth, suspension) = session.open_guarded(request);
        Self {
            session,
            depth,
            suspension,
        }
    }

    /// How this guard affected the injector
    pub fn suspension(&self) -> Suspension {
        self.suspension
    }

    /// True when dropping this guard will rearm the injector
    pub fn disarmed(&self) -> bool {
        self.suspension.disarmed()
    }
}

impl<I: Injector, C: ConfigSink> Deref for SuspensionGuard<'_, I, C> {
    type Target = InjectionSession<I, C>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<I: Injector, C: ConfigSink> DerefMut for SuspensionGuard<'_, I, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<I: Injector, C: ConfigSink> Drop for SuspensionGuard<'_, I, C> {
    fn drop(&mut self) {
        self.session.close_guarded(self.depth);
    }
}

impl<I: Injector, C: ConfigSink> std::fmt::Debug for SuspensionGuard<'_, I, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspensionGuard")
            .field("depth", &self.depth)
            .field("suspension", &self.suspension)
            .finish()
    }
}
