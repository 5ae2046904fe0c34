/*!
 * Boolean Latch
 *
 * One-shot gate: threads wait in shared mode until a single `signal` opens
 * it, after which every current and future waiter passes straight through.
 */

use crate::core::errors::SyncResult;
use crate::core::sync::parker::ThreadHandle;
use crate::core::sync::policy::SyncPolicy;
use crate::core::sync::state::SyncState;
use crate::core::sync::synchronizer::QueuedSynchronizer;
use std::fmt;
use std::time::Duration;

const CLOSED: i32 = 0;
const OPEN: i32 = 1;

/// Policy behind [`BooleanLatch`]
pub struct LatchPolicy;

impl SyncPolicy for LatchPolicy {
    fn try_acquire_shared(&self, state: &SyncState, _arg: i32) -> SyncResult<i32> {
        Ok(if state.get() != CLOSED { 1 } else { -1 })
    }

    fn try_release_shared(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
        state.set(OPEN);
        Ok(true)
    }
}

pub struct BooleanLatch {
    sync: QueuedSynchronizer<LatchPolicy>,
}

impl BooleanLatch {
    pub fn new() -> Self {
        Self {
            sync: QueuedSynchronizer::new(LatchPolicy),
        }
    }

    #[inline]
    pub fn sync(&self) -> &QueuedSynchronizer<LatchPolicy> {
        &self.sync
    }

    #[inline]
    pub fn is_signalled(&self) -> bool {
        self.sync.current_state() != CLOSED
    }

    /// Open the latch and release every waiter
    pub fn signal(&self) -> SyncResult<()> {
        self.sync.release_shared(OPEN).map(|_| ())
    }

    /// Block until signalled or the calling thread is interrupted
    pub fn wait(&self) -> SyncResult<()> {
        self.sync
            .acquire_shared_interruptibly(&ThreadHandle::current(), OPEN)
    }

    pub fn wait_uninterruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_shared(&ThreadHandle::current(), OPEN)
    }

    /// Block up to `timeout`; `Ok(false)` if still closed
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync
            .try_acquire_shared_for(&ThreadHandle::current(), OPEN, timeout)
    }
}

impl Default for BooleanLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BooleanLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BooleanLatch")
            .field("signalled", &self.is_signalled())
            .field("waiters", &self.sync.queue_length())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_opens() {
        let latch = BooleanLatch::new();
        assert!(!latch.is_signalled());
        assert_eq!(latch.wait_timeout(Duration::ZERO), Ok(false));

        latch.signal().unwrap();
        assert!(latch.is_signalled());
        latch.wait().unwrap();
        assert_eq!(latch.wait_timeout(Duration::ZERO), Ok(true));
    }

    #[test]
    fn test_wait_timeout_leaves_queue_clean() {
        let latch = BooleanLatch::new();
        assert_eq!(latch.wait_timeout(Duration::from_millis(10)), Ok(false));
        assert_eq!(latch.sync().queue_length(), 0);
    }

    #[test]
    fn test_releases_all_waiters() {
        let latch = Arc::new(BooleanLatch::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait())
            })
            .collect();

        while latch.sync().queue_length() < 4 {
            thread::yield_now();
        }
        latch.signal().unwrap();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(()));
        }
        assert!(!latch.sync().has_queued_threads());
    }
}
