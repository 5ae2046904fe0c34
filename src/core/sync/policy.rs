/*!
 * Synchronization Policy
 *
 * The capability interface a concrete primitive implements. The engine owns
 * queuing, parking and wakeups; the policy decides what the state means.
 *
 * # Design: Default Hooks Fail
 *
 * Every hook defaults to `UnsupportedMode`, so an exclusive-only primitive
 * implements three hooks and a shared-only one implements two. Calling into
 * a mode the policy does not support surfaces the error through the engine.
 */

use super::state::SyncState;
use crate::core::errors::{SyncError, SyncResult};

/// Acquisition policy over a [`SyncState`]
///
/// Hooks must not block. They may be called by any thread, concurrently, and
/// should only touch the state through its atomic accessors.
pub trait SyncPolicy: Send + Sync {
    /// Attempt an exclusive acquisition
    fn try_acquire(&self, state: &SyncState, arg: i32) -> SyncResult<bool> {
        let _ = (state, arg);
        Err(SyncError::UnsupportedMode("try_acquire"))
    }

    /// Attempt an exclusive release; `true` means the resource is now fully free
    fn try_release(&self, state: &SyncState, arg: i32) -> SyncResult<bool> {
        let _ = (state, arg);
        Err(SyncError::UnsupportedMode("try_release"))
    }

    /// Attempt a shared acquisition
    ///
    /// Negative: failed. Zero: acquired, later shared waiters should not
    /// expect to succeed. Positive: acquired, propagate to the next waiter.
    fn try_acquire_shared(&self, state: &SyncState, arg: i32) -> SyncResult<i32> {
        let _ = (state, arg);
        Err(SyncError::UnsupportedMode("try_acquire_shared"))
    }

    /// Attempt a shared release; `true` if waiters may now succeed
    fn try_release_shared(&self, state: &SyncState, arg: i32) -> SyncResult<bool> {
        let _ = (state, arg);
        Err(SyncError::UnsupportedMode("try_release_shared"))
    }

    /// Whether the calling thread holds the state exclusively
    fn is_held_exclusively(&self, state: &SyncState) -> SyncResult<bool> {
        let _ = state;
        Err(SyncError::UnsupportedMode("is_held_exclusively"))
    }
}
