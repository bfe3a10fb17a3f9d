// SessionTail - app/mod.rs
//
// Application layer: change detection, scheduling, file jobs, dispatch and
// checkpoints.
// Dependencies: core layer, platform::fs.
// Must NOT depend on: CLI or config-file loading.

pub mod checkpoint;
pub mod dispatch;
pub mod file_state;
pub mod monitor;
pub mod scheduler;
pub mod watch;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, carrying on with the inner value if a holder panicked.
/// Every shared structure here stays consistent between statements, so a
/// poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
