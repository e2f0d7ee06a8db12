use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Acquire an in-process store lock, recovering the guard if a previous holder panicked.
///
/// Store entries are plain strings with no cross-key invariants, so the data behind a
/// poisoned lock is still usable; the worst case is a single lost write.
pub(crate) fn store_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned store lock"
            );
            poisoned.into_inner()
        }
    }
}
