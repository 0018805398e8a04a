//! Nesting-safe suspension over the injector's armed/disarmed flag
//!
//! Every open pause scope is one entry. An entry records how that scope
//! disarmed the injector, or [`Suspension::Inert`] when it did not, so that
//! closing a scope only rearms what the same scope disarmed. A scope opened
//! while an outer budget is running gives that budget back on close instead
//! of rearming under it.

use crate::capability::Injector;
use crate::error::ProtocolError;
use smallvec::SmallVec;

/// What a caller asks for when opening a pause scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseRequest {
    /// Disarm until the scope closes
    Forever,
    /// Protect the next `n` allocation events; `0` leaves the scope exposed
    Budget(u32),
}

/// How an open scope affected the injector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// This scope made no injector call
    Inert,
    /// This scope disarmed the injector until it closes
    Forever,
    /// This scope disarmed the injector for `n` allocation events
    Budget(u32),
}

impl Suspension {
    /// True when closing this scope must rearm the injector
    #[inline]
    #[must_use]
    pub fn disarmed(self) -> bool {
        !matches!(self, Self::Inert)
    }
}

/// Who opened a scope; manual resumes may only close manual scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    Manual,
    Guard,
}

/// What closing a disarming scope hands back to the injector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restore {
    Rearm,
    Budget(u32),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    suspension: Suspension,
    owner: Owner,
    restore: Restore,
}

const INLINE_DEPTH: usize = 16;

/// Open pause scopes, innermost last
#[derive(Debug, Default)]
pub struct PauseStack {
    entries: SmallVec<[Entry; INLINE_DEPTH]>,
}

impl PauseStack {
    /// Empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unmatched pauses
    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// True when no scope is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when some open scope holds an indefinite suspension
    #[must_use]
    pub fn suspended_forever(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.suspension == Suspension::Forever)
    }

    /// Innermost scope's suspension
    #[must_use]
    pub fn top(&self) -> Option<Suspension> {
        self.entries.last().map(|e| e.suspension)
    }

    pub(crate) fn push<I: Injector + ?Sized>(
        &mut self,
        injector: &mut I,
        request: PauseRequest,
        owner: Owner,
    ) -> Suspension {
        let mut restore = Restore::Rearm;
        let suspension = match request {
            // already disarmed indefinitely; a budget here would shorten it
            _ if self.suspended_forever() => Suspension::Inert,
            PauseRequest::Budget(0) => Suspension::Inert,
            PauseRequest::Forever => {
                restore = self.restore_point(injector);
                injector.pause(0);
                Suspension::Forever
            }
            PauseRequest::Budget(n) => {
                restore = self.restore_point(injector);
                injector.pause(0);
                Suspension::Budget(n)
            }
        };
        self.entries.push(Entry {
            suspension,
            owner,
            restore,
        });
        if suspension.disarmed() || self.suspended_forever() {
            tracing::trace!(?suspension, depth = self.entries.len(), "pause opened");
        }
        if let Suspension::Budget(n) = suspension {
            // bookkeeping above ran disarmed; the budget starts here
            injector.pause(n);
        }
        suspension
    }

    /// State to hand back when a scope opened now closes
    ///
    /// Falls back to the outer budget's full size when the injector cannot
    /// report what is left of it.
    fn restore_point<I: Injector + ?Sized>(&self, injector: &I) -> Restore {
        let outer = self.entries.iter().rev().find_map(|e| match e.suspension {
            Suspension::Budget(n) => Some(n),
            _ => None,
        });
        match (outer, injector.budget_remaining()) {
            (None, _) | (Some(_), Some(0)) => Restore::Rearm,
            (Some(_), Some(left)) => Restore::Budget(left),
            (Some(n), None) => Restore::Budget(n),
        }
    }

    pub(crate) fn pop<I: Injector + ?Sized>(
        &mut self,
        injector: &mut I,
        owner: Owner,
    ) -> Result<Suspension, ProtocolError> {
        let top = self.entries.last().ok_or(ProtocolError::ResumeWithoutPause)?;
        if owner == Owner::Manual && top.owner == Owner::Guard {
            return Err(ProtocolError::ResumeCrossesGuard);
        }
        Ok(self.close_top(injector))
    }

    /// Close scopes until `depth` remain; returns how many were closed
    pub(crate) fn unwind_to<I: Injector + ?Sized>(&mut self, injector: &mut I, depth: usize) -> usize {
        let mut closed = 0;
        while self.entries.len() > depth {
            self.close_top(injector);
            closed += 1;
        }
        closed
    }

    fn close_top<I: Injector + ?Sized>(&mut self, injector: &mut I) -> Suspension {
        let Some(entry) = self.entries.pop() else {
            return Suspension::Inert;
        };
        if entry.suspension.disarmed() {
            // a spent budget has already rearmed the injector
            if entry.suspension == Suspension::Forever {
                tracing::trace!(depth = self.entries.len(), "pause closed");
            }
            match entry.restore {
                Restore::Rearm => injector.resume(),
                Restore::Budget(left) => injector.pause(left),
            }
        }
        entry.suspension
    }
}
