//! Cancel-or-commit handshake for one generation run.
//!
//! A run that is abandoned by its caller must not store its portfolio, and a
//! run that has started storing must not be reported as abandoned. Both
//! sides race on a single atomic transition out of `RUNNING`; exactly one
//! of [`GenerationGuard::cancel`] and [`GenerationGuard::commit`] wins.

use std::sync::atomic::{AtomicU8, Ordering};

const RUNNING: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
pub struct GenerationGuard {
    state: AtomicU8,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
        }
    }

    /// Abandon the run. `false` when the run already committed its result.
    pub fn cancel(&self) -> bool {
        self.transition(CANCELLED) || self.is_cancelled()
    }

    /// Claim the right to persist. `false` when the run was cancelled.
    pub fn commit(&self) -> bool {
        self.transition(COMMITTED) || self.state.load(Ordering::SeqCst) == COMMITTED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(RUNNING, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for GenerationGuard {
    fn default() -> Self {
        Self::new()
    }
}
