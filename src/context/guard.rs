//! Scoped acquisition of the shared execution lock.

use std::sync::Arc;

use parking_lot::ReentrantMutexGuard;
use tracing::trace;

use crate::error::{BridgeError, BridgeResult};
use crate::script::{ScriptRuntime, ThreadState};

/// Holds the execution lock with one interpreter state swapped in.
///
/// Dropping the guard restores the state that was current before and then
/// releases the lock, on every exit path.
pub struct ExecutionGuard<'a> {
    runtime: &'a ScriptRuntime,
    previous: Option<Arc<ThreadState>>,
    state_id: u64,
    _lock: ReentrantMutexGuard<'a, ()>,
}

impl<'a> ExecutionGuard<'a> {
    /// Blocks until the lock is free, then swaps `state` in.
    ///
    /// Re-entry from the thread already running `state` is allowed; entering a
    /// different state while one is active on this thread is refused.
    pub fn enter(runtime: &'a ScriptRuntime, state: &Arc<ThreadState>) -> BridgeResult<Self> {
        let lock = runtime.acquire();
        if let Some(current) = runtime.current() {
            if current.id() != state.id() {
                return Err(BridgeError::thread_state(format!(
                    "interpreter state {} is active on this thread; cannot enter {}",
                    current.id(),
                    state.id()
                )));
            }
        }
        let previous = runtime.swap(Some(state.clone()));
        trace!(state = state.id(), nested = previous.is_some(), "execution guard entered");
        Ok(Self {
            runtime,
            previous,
            state_id: state.id(),
            _lock: lock,
        })
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.runtime.swap(self.previous.take());
        trace!(state = self.state_id, "execution guard released");
    }
}
