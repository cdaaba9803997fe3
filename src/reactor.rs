//! The reactor tick primitive and its cross-thread wake signal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct WakeState {
    pending: Mutex<bool>,
    wake: Condvar,
}

/// Blocks the reactor thread between ticks.
///
/// `run_for` returns early whenever a [`Signal`] notification arrives, and a
/// notification sent while the reactor is busy is latched so the next
/// `run_for` returns immediately. Lost wake-ups are therefore impossible.
pub(crate) struct Reactor {
    state: Arc<WakeState>,
}

/// Cross-thread wake-up handle bound to one [`Reactor`].
#[derive(Clone)]
pub(crate) struct Signal {
    state: Arc<WakeState>,
}

impl Reactor {
    pub(crate) fn new() -> (Reactor, Signal) {
        let state = Arc::new(WakeState { pending: Mutex::new(false), wake: Condvar::new() });
        (Reactor { state: Arc::clone(&state) }, Signal { state })
    }

    /// Wait until notified or until `timeout` elapses, whichever is first.
    pub(crate) fn run_for(&self, timeout: Duration) {
        let mut pending = self.state.pending.lock();
        if !*pending {
            let _ = self.state.wake.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

impl Signal {
    /// Wake the reactor. Safe from any thread; never blocks on reactor work.
    pub(crate) fn notify(&self) {
        let mut pending = self.state.pending.lock();
        *pending = true;
        self.state.wake.notify_one();
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Reactor")
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signal")
    }
}
