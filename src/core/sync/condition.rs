/*!
 * Condition Queue
 *
 * Wait/signal for one condition of an exclusive-mode synchronizer.
 *
 * # Protocol
 *
 * A waiter appends a `Condition` node to this queue, fully releases the
 * synchronizer (remembering the exact state), and parks until its node has
 * been moved to the wait queue. It then re-acquires with the saved state.
 *
 * `signal` moves the longest waiting node across by CASing it from
 * `Condition` to `None` and enqueueing it. A waiter that times out or is
 * interrupted races for the same CAS: winning it means the wait was
 * cancelled before any signal; losing it means a signal is in flight and
 * the waiter yields until that transfer lands.
 *
 * The chain itself is only mutated while the caller holds the synchronizer
 * exclusively, so plain loads and stores are enough for it.
 */

use super::node::{Node, NodeRef, WaitStatus};
use super::parker::ThreadHandle;
use super::policy::SyncPolicy;
use super::synchronizer::QueuedSynchronizer;
use crate::core::errors::{SyncError, SyncResult};
use arc_swap::ArcSwapOption;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How an interrupt observed during a wait must be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptMode {
    None,
    /// Interrupted after being signalled: re-assert on the thread
    Reinterrupt,
    /// Interrupted before being signalled: fail the wait
    Throw,
}

/// Condition variable bound to a [`QueuedSynchronizer`]
pub struct Condition<'a, P: SyncPolicy> {
    sync: &'a QueuedSynchronizer<P>,
    first_waiter: ArcSwapOption<Node>,
    last_waiter: ArcSwapOption<Node>,
}

impl<'a, P: SyncPolicy> Condition<'a, P> {
    pub(crate) fn new(sync: &'a QueuedSynchronizer<P>) -> Self {
        Self {
            sync,
            first_waiter: ArcSwapOption::empty(),
            last_waiter: ArcSwapOption::empty(),
        }
    }

    /// Whether this condition was created by `sync`
    #[inline]
    pub fn is_owned_by(&self, sync: &QueuedSynchronizer<P>) -> bool {
        std::ptr::eq(self.sync, sync)
    }

    fn check_held(&self) -> SyncResult<()> {
        if self.sync.is_held_exclusively()? {
            Ok(())
        } else {
            Err(SyncError::IllegalMonitorState)
        }
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Wait until signalled or interrupted
    pub fn wait(&self, me: &ThreadHandle) -> SyncResult<()> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        let node = self.add_condition_waiter(me);
        let saved = self.sync.fully_release(&node)?;

        let mut mode = InterruptMode::None;
        while !self.sync.state().queue.is_on_sync_queue(&node) {
            me.park();
            mode = self.check_interrupt_while_waiting(&node, me);
            if mode != InterruptMode::None {
                break;
            }
        }
        self.finish_wait(&node, me, saved, mode)
    }

    /// Wait until signalled; interrupts are re-asserted afterwards
    pub fn wait_uninterruptibly(&self, me: &ThreadHandle) -> SyncResult<()> {
        let node = self.add_condition_waiter(me);
        let saved = self.sync.fully_release(&node)?;

        let mut interrupted = false;
        while !self.sync.state().queue.is_on_sync_queue(&node) {
            me.park();
            if me.take_interrupt() {
                interrupted = true;
            }
        }
        if self.sync.acquire_queued(&node, me, saved)? || interrupted {
            me.interrupt();
        }
        Ok(())
    }

    /// Wait up to `nanos`; returns an estimate of the time left, `<= 0` once
    /// the timeout elapsed
    pub fn wait_nanos(&self, me: &ThreadHandle, nanos: i64) -> SyncResult<i64> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        let node = self.add_condition_waiter(me);
        let saved = self.sync.fully_release(&node)?;

        let timeout = Duration::from_nanos(nanos.max(0) as u64);
        let started = Instant::now();
        let (_, mode) = self.park_until_transferred(&node, me, started.checked_add(timeout));
        self.finish_wait(&node, me, saved, mode)?;

        Ok(remaining_nanos(timeout, started.elapsed()))
    }

    /// Wait up to `timeout`; `Ok(false)` if it elapsed before a signal
    pub fn wait_timeout(&self, me: &ThreadHandle, timeout: Duration) -> SyncResult<bool> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        let node = self.add_condition_waiter(me);
        let saved = self.sync.fully_release(&node)?;

        let (timed_out, mode) =
            self.park_until_transferred(&node, me, Instant::now().checked_add(timeout));
        self.finish_wait(&node, me, saved, mode)?;
        Ok(!timed_out)
    }

    /// Wait until `deadline`; `Ok(false)` if it passed before a signal
    pub fn wait_until(&self, me: &ThreadHandle, deadline: Instant) -> SyncResult<bool> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        let node = self.add_condition_waiter(me);
        let saved = self.sync.fully_release(&node)?;

        let (timed_out, mode) = self.park_until_transferred(&node, me, Some(deadline));
        self.finish_wait(&node, me, saved, mode)?;
        Ok(!timed_out)
    }

    /// Timed park loop shared by the deadline-based waits.
    /// Returns (cancelled by timeout before any signal, interrupt mode).
    fn park_until_transferred(
        &self,
        node: &NodeRef,
        me: &ThreadHandle,
        deadline: Option<Instant>,
    ) -> (bool, InterruptMode) {
        let queue = &self.sync.state().queue;
        let config = self.sync.config();

        while !queue.is_on_sync_queue(node) {
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        let timed_out = self.transfer_after_cancelled_wait(node);
                        debug!(timed_out, "Condition wait deadline passed");
                        return (timed_out, InterruptMode::None);
                    }
                    if config.should_park_for(remaining) {
                        me.park_until(deadline);
                    }
                }
                None => me.park(),
            }
            let mode = self.check_interrupt_while_waiting(node, me);
            if mode != InterruptMode::None {
                return (false, mode);
            }
        }
        (false, InterruptMode::None)
    }

    /// Re-acquire with the saved state, tidy the chain, report interrupts
    fn finish_wait(
        &self,
        node: &NodeRef,
        me: &ThreadHandle,
        saved: i32,
        mut mode: InterruptMode,
    ) -> SyncResult<()> {
        if self.sync.acquire_queued(node, me, saved)? && mode != InterruptMode::Throw {
            mode = InterruptMode::Reinterrupt;
        }
        if node.next_waiter().is_some() {
            self.unlink_cancelled_waiters();
        }
        match mode {
            InterruptMode::Throw => Err(SyncError::Interrupted),
            InterruptMode::Reinterrupt => {
                me.interrupt();
                Ok(())
            }
            InterruptMode::None => Ok(()),
        }
    }

    fn check_interrupt_while_waiting(&self, node: &NodeRef, me: &ThreadHandle) -> InterruptMode {
        if !me.take_interrupt() {
            InterruptMode::None
        } else if self.transfer_after_cancelled_wait(node) {
            InterruptMode::Throw
        } else {
            InterruptMode::Reinterrupt
        }
    }

    /// Move a timed-out or interrupted waiter to the wait queue.
    /// True if this happened before any signal.
    fn transfer_after_cancelled_wait(&self, node: &NodeRef) -> bool {
        let queue = &self.sync.state().queue;
        if node.cas_status(WaitStatus::Condition, WaitStatus::None) {
            queue.enqueue(node);
            return true;
        }
        // Lost to a concurrent signal: let its enqueue finish first
        while !queue.is_on_sync_queue(node) {
            thread::yield_now();
        }
        false
    }

    // =========================================================================
    // Signalling
    // =========================================================================

    /// Move the longest waiting thread to the wait queue
    pub fn signal(&self) -> SyncResult<()> {
        self.check_held()?;
        let mut first = self.first_waiter.load_full();
        while let Some(node) = first {
            let next = node.next_waiter();
            if next.is_none() {
                self.last_waiter.store(None);
            }
            self.first_waiter.store(next.clone());
            node.set_next_waiter(None);

            if self.transfer_for_signal(&node) {
                break;
            }
            first = next;
        }
        Ok(())
    }

    /// Move every waiting thread to the wait queue
    pub fn signal_all(&self) -> SyncResult<()> {
        self.check_held()?;
        let mut first = self.first_waiter.load_full();
        self.first_waiter.store(None);
        self.last_waiter.store(None);
        while let Some(node) = first {
            first = node.next_waiter();
            node.set_next_waiter(None);
            self.transfer_for_signal(&node);
        }
        Ok(())
    }

    /// False if the node was cancelled before it could be signalled
    fn transfer_for_signal(&self, node: &NodeRef) -> bool {
        if !node.cas_status(WaitStatus::Condition, WaitStatus::None) {
            return false;
        }

        let pred = self.sync.state().queue.enqueue(node);
        let ws = pred.status();
        if ws.is_cancelled() || !pred.cas_status(ws, WaitStatus::Signal) {
            node.unpark_thread();
        }
        trace!("Transferred condition waiter to wait queue");
        true
    }

    // =========================================================================
    // Chain maintenance
    // =========================================================================

    fn add_condition_waiter(&self, me: &ThreadHandle) -> NodeRef {
        debug_assert!(me.is_current(), "ThreadHandle used from a foreign thread");
        let mut tail = self.last_waiter.load_full();
        if matches!(&tail, Some(t) if t.status() != WaitStatus::Condition) {
            self.unlink_cancelled_waiters();
            tail = self.last_waiter.load_full();
        }

        let node = Node::condition_waiter(me);
        match tail {
            Some(t) => t.set_next_waiter(Some(node.clone())),
            None => self.first_waiter.store(Some(node.clone())),
        }
        self.last_waiter.store(Some(node.clone()));
        node
    }

    /// Drop every node that is no longer waiting on the condition
    fn unlink_cancelled_waiters(&self) {
        let mut cursor = self.first_waiter.load_full();
        let mut trail: Option<NodeRef> = None;
        while let Some(t) = cursor {
            let next = t.next_waiter();
            if t.status() != WaitStatus::Condition {
                t.set_next_waiter(None);
                match &trail {
                    None => self.first_waiter.store(next.clone()),
                    Some(tr) => tr.set_next_waiter(next.clone()),
                }
                if next.is_none() {
                    self.last_waiter.store(trail.clone());
                }
            } else {
                trail = Some(t);
            }
            cursor = next;
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    fn for_each_waiting(&self, mut f: impl FnMut(&NodeRef)) {
        let mut cursor = self.first_waiter.load_full();
        while let Some(w) = cursor {
            if w.status() == WaitStatus::Condition {
                f(&w);
            }
            cursor = w.next_waiter();
        }
    }

    pub(crate) fn has_waiters(&self) -> SyncResult<bool> {
        self.check_held()?;
        let mut any = false;
        self.for_each_waiting(|_| any = true);
        Ok(any)
    }

    pub(crate) fn wait_queue_length(&self) -> SyncResult<usize> {
        self.check_held()?;
        let mut n = 0;
        self.for_each_waiting(|_| n += 1);
        Ok(n)
    }

    pub(crate) fn waiting_threads(&self) -> SyncResult<Vec<ThreadId>> {
        self.check_held()?;
        let mut threads = Vec::new();
        self.for_each_waiting(|w| {
            if let Some(owner) = w.thread() {
                threads.push(owner.thread_id());
            }
        });
        Ok(threads)
    }
}

fn remaining_nanos(timeout: Duration, elapsed: Duration) -> i64 {
    let timeout = i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX);
    let elapsed = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
    timeout.saturating_sub(elapsed)
}

impl<P: SyncPolicy> QueuedSynchronizer<P> {
    /// Whether `condition` was created by this synchronizer
    pub fn owns(&self, condition: &Condition<'_, P>) -> bool {
        condition.is_owned_by(self)
    }

    fn check_owns(&self, condition: &Condition<'_, P>) -> SyncResult<()> {
        if self.owns(condition) {
            Ok(())
        } else {
            Err(SyncError::IllegalArgument("condition not owned by this synchronizer".into()))
        }
    }

    /// Whether any thread is waiting on `condition`
    pub fn has_waiters(&self, condition: &Condition<'_, P>) -> SyncResult<bool> {
        self.check_owns(condition)?;
        condition.has_waiters()
    }

    /// Estimated number of threads waiting on `condition`
    pub fn wait_queue_length(&self, condition: &Condition<'_, P>) -> SyncResult<usize> {
        self.check_owns(condition)?;
        condition.wait_queue_length()
    }

    /// Threads waiting on `condition`, longest waiting first
    pub fn waiting_threads(&self, condition: &Condition<'_, P>) -> SyncResult<Vec<ThreadId>> {
        self.check_owns(condition)?;
        condition.waiting_threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::state::SyncState;

    struct Mutex;

    impl SyncPolicy for Mutex {
        fn try_acquire(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
            Ok(state.compare_and_set(0, 1))
        }

        fn try_release(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
            if state.get() == 0 {
                return Ok(false);
            }
            state.set(0);
            Ok(true)
        }

        fn is_held_exclusively(&self, state: &SyncState) -> SyncResult<bool> {
            Ok(state.get() == 1)
        }
    }

    #[test]
    fn test_signal_requires_hold() {
        let sync = QueuedSynchronizer::new(Mutex);
        let cond = sync.new_condition();

        assert_eq!(cond.signal(), Err(SyncError::IllegalMonitorState));
        assert_eq!(cond.signal_all(), Err(SyncError::IllegalMonitorState));
        assert_eq!(sync.has_waiters(&cond), Err(SyncError::IllegalMonitorState));
    }

    #[test]
    fn test_wait_without_hold_fails() {
        let sync = QueuedSynchronizer::new(Mutex);
        let cond = sync.new_condition();
        let me = ThreadHandle::current();

        assert_eq!(cond.wait(&me), Err(SyncError::IllegalMonitorState));

        // The failed waiter is left cancelled and swept on the next wait
        sync.acquire(&me, 1).unwrap();
        assert_eq!(sync.wait_queue_length(&cond), Ok(0));
    }

    #[test]
    fn test_foreign_condition_rejected() {
        let a = QueuedSynchronizer::new(Mutex);
        let b = QueuedSynchronizer::new(Mutex);
        let cond = b.new_condition();

        assert!(!a.owns(&cond));
        assert!(b.owns(&cond));
        assert!(matches!(
            a.wait_queue_length(&cond),
            Err(SyncError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_wait_timeout_reacquires() {
        let sync = QueuedSynchronizer::new(Mutex);
        let cond = sync.new_condition();
        let me = ThreadHandle::current();

        sync.acquire(&me, 1).unwrap();
        let signalled = cond.wait_timeout(&me, Duration::from_millis(20)).unwrap();
        assert!(!signalled);
        assert_eq!(sync.state().get(), 1);
        assert_eq!(sync.wait_queue_length(&cond), Ok(0));
    }

    #[test]
    fn test_wait_nanos_reports_overrun() {
        let sync = QueuedSynchronizer::new(Mutex);
        let cond = sync.new_condition();
        let me = ThreadHandle::current();

        sync.acquire(&me, 1).unwrap();
        let remaining = cond.wait_nanos(&me, 5_000_000).unwrap();
        assert!(remaining <= 0);
        assert!(sync.is_held_exclusively().unwrap());
    }

    #[test]
    fn test_interrupt_before_wait() {
        let sync = QueuedSynchronizer::new(Mutex);
        let cond = sync.new_condition();
        let me = ThreadHandle::current();

        sync.acquire(&me, 1).unwrap();
        me.interrupt();
        assert_eq!(cond.wait(&me), Err(SyncError::Interrupted));
        assert_eq!(sync.state().get(), 1);
    }

    #[test]
    fn test_signal_with_no_waiters_is_noop() {
        let sync = QueuedSynchronizer::new(Mutex);
        let cond = sync.new_condition();
        let me = ThreadHandle::current();

        sync.acquire(&me, 1).unwrap();
        assert_eq!(cond.signal(), Ok(()));
        assert_eq!(cond.signal_all(), Ok(()));
        assert_eq!(sync.has_waiters(&cond), Ok(false));
    }

    #[test]
    fn test_remaining_nanos() {
        assert_eq!(
            remaining_nanos(Duration::from_nanos(100), Duration::from_nanos(40)),
            60
        );
        assert_eq!(
            remaining_nanos(Duration::from_nanos(10), Duration::from_nanos(40)),
            -30
        );
    }
}
