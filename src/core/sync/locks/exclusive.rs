/*!
 * Exclusive Lock
 *
 * Non-reentrant mutex: state 0 is unlocked, 1 is locked. The owning thread is
 * tracked next to the state so releases and condition waits can be checked.
 *
 * Barging by default; a fair lock refuses to barge past queued threads.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::condition::Condition;
use crate::core::sync::config::SyncConfig;
use crate::core::sync::parker::ThreadHandle;
use crate::core::sync::policy::SyncPolicy;
use crate::core::sync::state::SyncState;
use crate::core::sync::synchronizer::QueuedSynchronizer;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;
const NO_OWNER: u64 = 0;

static NEXT_OWNER_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static OWNER_TOKEN: u64 = NEXT_OWNER_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Non-zero token identifying the calling thread
#[inline]
fn owner_token() -> u64 {
    OWNER_TOKEN.with(|t| *t)
}

/// Policy behind [`ExclusiveLock`]
pub struct ExclusivePolicy {
    fair: bool,
    owner: AtomicU64,
}

impl ExclusivePolicy {
    pub fn new(fair: bool) -> Self {
        Self {
            fair,
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    #[inline]
    pub fn is_fair(&self) -> bool {
        self.fair
    }

    /// Take the lock if free, ignoring fairness
    fn barge(&self, state: &SyncState) -> bool {
        if state.compare_and_set(UNLOCKED, LOCKED) {
            self.owner.store(owner_token(), Ordering::Release);
            true
        } else {
            false
        }
    }
}

impl SyncPolicy for ExclusivePolicy {
    fn try_acquire(&self, state: &SyncState, arg: i32) -> SyncResult<bool> {
        debug_assert_eq!(arg, LOCKED);
        if self.fair && state.has_queued_predecessors() {
            return Ok(false);
        }
        Ok(self.barge(state))
    }

    fn try_release(&self, state: &SyncState, arg: i32) -> SyncResult<bool> {
        debug_assert_eq!(arg, LOCKED);
        if state.get() == UNLOCKED || self.owner.load(Ordering::Acquire) != owner_token() {
            return Err(SyncError::IllegalMonitorState);
        }
        self.owner.store(NO_OWNER, Ordering::Release);
        state.set(UNLOCKED);
        Ok(true)
    }

    fn is_held_exclusively(&self, state: &SyncState) -> SyncResult<bool> {
        Ok(state.get() == LOCKED && self.owner.load(Ordering::Acquire) == owner_token())
    }
}

/// Blocking mutual exclusion lock without reentrancy
///
/// # Examples
///
/// ```
/// use clh_sync::core::sync::locks::ExclusiveLock;
///
/// let lock = ExclusiveLock::new();
/// {
///     let _guard = lock.guard().unwrap();
///     assert!(lock.is_held_by_current_thread());
/// }
/// assert!(!lock.is_locked());
/// ```
pub struct ExclusiveLock {
    sync: QueuedSynchronizer<ExclusivePolicy>,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::with_config(false, SyncConfig::default())
    }

    /// Lock that hands out ownership in arrival order
    pub fn fair() -> Self {
        Self::with_config(true, SyncConfig::default())
    }

    pub fn with_config(fair: bool, config: SyncConfig) -> Self {
        Self {
            sync: QueuedSynchronizer::with_config(ExclusivePolicy::new(fair), config),
        }
    }

    /// The underlying synchronizer, for queue introspection
    #[inline]
    pub fn sync(&self) -> &QueuedSynchronizer<ExclusivePolicy> {
        &self.sync
    }

    /// Block until the lock is acquired
    pub fn lock(&self) -> SyncResult<()> {
        self.sync.acquire(&ThreadHandle::current(), LOCKED)
    }

    /// Block until acquired or the calling thread is interrupted
    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.sync
            .acquire_interruptibly(&ThreadHandle::current(), LOCKED)
    }

    /// Acquire only if free right now; barges even on a fair lock
    pub fn try_lock(&self) -> bool {
        self.sync.policy().barge(self.sync.state())
    }

    /// Acquire within `timeout`; `Ok(false)` if it elapsed
    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync
            .try_acquire_for(&ThreadHandle::current(), LOCKED, timeout)
    }

    /// Release; fails with `IllegalMonitorState` unless held by the caller
    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release(LOCKED).map(|_| ())
    }

    /// Lock and return a guard that unlocks on drop
    pub fn guard(&self) -> SyncResult<ExclusiveGuard<'_>> {
        self.lock()?;
        Ok(ExclusiveGuard { lock: self })
    }

    pub fn new_condition(&self) -> Condition<'_, ExclusivePolicy> {
        self.sync.new_condition()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.sync.current_state() == LOCKED
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.is_held_exclusively().unwrap_or(false)
    }

    #[inline]
    pub fn is_fair(&self) -> bool {
        self.sync.policy().is_fair()
    }
}

impl Default for ExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held = if self.is_locked() { "locked" } else { "unlocked" };
        write!(f, "ExclusiveLock[{}] {}", held, self.sync)
    }
}

impl fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("locked", &self.is_locked())
            .field("fair", &self.is_fair())
            .field("queue_length", &self.sync.queue_length())
            .finish()
    }
}

/// Held [`ExclusiveLock`]; unlocks when dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    lock: &'a ExclusiveLock,
}

impl ExclusiveGuard<'_> {
    pub fn lock(&self) -> &ExclusiveLock {
        self.lock
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!(error = %e, "ExclusiveGuard failed to unlock");
        }
    }
}
