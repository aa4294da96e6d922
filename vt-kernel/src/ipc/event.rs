//! Event objects.

/// A manual- or auto-reset event.
///
/// Setting a manual-reset event wakes every current waiter and leaves the
/// event signalled until an explicit reset. Setting an auto-reset event
/// wakes exactly one waiter (FIFO) and consumes the signal. The waking
/// itself is the wait engine's job; this type only tracks state.
#[derive(Debug, Clone)]
pub struct Event {
    signalled: bool,
    manual_reset: bool,
}

impl Event {
    pub fn new(manual_reset: bool, initially_signalled: bool) -> Event {
        Event {
            signalled: initially_signalled,
            manual_reset,
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.signalled
    }

    pub fn is_manual_reset(&self) -> bool {
        self.manual_reset
    }

    pub fn set(&mut self) {
        self.signalled = true;
    }

    pub fn reset(&mut self) {
        self.signalled = false;
    }

    /// Consume the signal on behalf of a satisfied waiter. Manual-reset
    /// events stay signalled; auto-reset events clear.
    pub fn consume(&mut self) {
        if !self.manual_reset {
            self.signalled = false;
        }
    }
}
