//! Per-process POSIX-style signal state.
//!
//! Signals are queued in send order and delivered one at a time at the two
//! delivery points (syscall entry and preemption checkpoints). A handler
//! runs to completion in the process context before the next delivery.
//! SIGKILL never reaches this queue: the sender kills the target directly.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use vt_abi::{Pid, Signal, SignalDefault};

/// What to do with a delivered signal.
#[derive(Clone)]
pub enum Disposition {
    /// Apply [`Signal::default_action`].
    Default,
    /// Drop the signal.
    Ignore,
    /// Run a guest-installed handler in the process context.
    Handler(Arc<dyn Fn(Signal) + Send + Sync>),
}

impl std::fmt::Debug for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Default => write!(f, "Default"),
            Disposition::Ignore => write!(f, "Ignore"),
            Disposition::Handler(_) => write!(f, "Handler(..)"),
        }
    }
}

/// A queued, not-yet-delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSignal {
    pub signal: Signal,
    pub sender: Pid,
}

/// Signal block of a process record.
#[derive(Debug, Default)]
pub struct SignalState {
    pending: VecDeque<PendingSignal>,
    mask: u64,
    handlers: HashMap<u32, Disposition>,
}

impl SignalState {
    pub fn new() -> SignalState {
        SignalState::default()
    }

    /// Queue a signal. Send order is preserved.
    pub fn push(&mut self, signal: Signal, sender: Pid) {
        self.pending.push_back(PendingSignal { signal, sender });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Replace the blocked-signal mask (a bit per signal number).
    /// SIGKILL cannot be masked; its bit is ignored.
    pub fn set_mask(&mut self, mask: u64) {
        self.mask = mask & !(1 << Signal::Kill.number());
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    fn is_masked(&self, signal: Signal) -> bool {
        !signal.is_unblockable() && self.mask & (1 << signal.number()) != 0
    }

    /// Take the first deliverable (non-masked) pending signal, preserving
    /// the order of everything still blocked.
    pub fn take_deliverable(&mut self) -> Option<PendingSignal> {
        let idx = self
            .pending
            .iter()
            .position(|p| !self.is_masked(p.signal))?;
        self.pending.remove(idx)
    }

    pub fn set_disposition(&mut self, signal: Signal, disposition: Disposition) {
        match disposition {
            Disposition::Default => {
                self.handlers.remove(&signal.number());
            }
            other => {
                self.handlers.insert(signal.number(), other);
            }
        }
    }

    pub fn disposition(&self, signal: Signal) -> Disposition {
        self.handlers
            .get(&signal.number())
            .cloned()
            .unwrap_or(Disposition::Default)
    }

    /// Drop every queued signal (process teardown).
    pub fn drain(&mut self) {
        self.pending.clear();
    }
}

/// Resolve what delivering `signal` should do given a disposition.
#[derive(Clone)]
pub enum DeliveryAction {
    Kill,
    Terminate,
    Ignore,
    Run(Arc<dyn Fn(Signal) + Send + Sync>),
}

pub fn resolve(signal: Signal, disposition: &Disposition) -> DeliveryAction {
    match disposition {
        Disposition::Handler(f) if !signal.is_unblockable() => DeliveryAction::Run(f.clone()),
        Disposition::Ignore if !signal.is_unblockable() => DeliveryAction::Ignore,
        _ => match signal.default_action() {
            SignalDefault::Kill => DeliveryAction::Kill,
            SignalDefault::Terminate => DeliveryAction::Terminate,
            SignalDefault::Ignore => DeliveryAction::Ignore,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_preserves_send_order() {
        let mut s = SignalState::new();
        s.push(Signal::Usr1, Pid(1));
        s.push(Signal::Usr2, Pid(1));
        assert_eq!(s.take_deliverable().unwrap().signal, Signal::Usr1);
        assert_eq!(s.take_deliverable().unwrap().signal, Signal::Usr2);
        assert!(s.take_deliverable().is_none());
    }

    #[test]
    fn masked_signals_stay_queued() {
        let mut s = SignalState::new();
        s.set_mask(1 << Signal::Usr1.number());
        s.push(Signal::Usr1, Pid(1));
        s.push(Signal::Term, Pid(1));

        // Usr1 is skipped, Term delivers first.
        assert_eq!(s.take_deliverable().unwrap().signal, Signal::Term);
        assert!(s.take_deliverable().is_none());

        s.set_mask(0);
        assert_eq!(s.take_deliverable().unwrap().signal, Signal::Usr1);
    }

    #[test]
    fn kill_cannot_be_masked() {
        let mut s = SignalState::new();
        s.set_mask(u64::MAX);
        assert_eq!(s.mask() & (1 << Signal::Kill.number()), 0);
    }

    #[test]
    fn default_actions_resolve() {
        let term = resolve(Signal::Term, &Disposition::Default);
        assert!(matches!(term, DeliveryAction::Terminate));

        let chld = resolve(Signal::Chld, &Disposition::Default);
        assert!(matches!(chld, DeliveryAction::Ignore));

        let handled = resolve(Signal::Term, &Disposition::Handler(Arc::new(|_| {})));
        assert!(matches!(handled, DeliveryAction::Run(_)));
    }
}
