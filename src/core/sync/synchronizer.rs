/*!
 * Queued Synchronizer
 *
 * The generic acquire/release engine: one policy, one state, one wait queue.
 *
 * # Acquisition
 *
 * Every entry point first calls the policy hook directly; the queue is only
 * touched after that fast path fails, so an uncontended synchronizer never
 * allocates. Arriving threads may barge ahead of queued ones.
 *
 * Queued waiters loop: when their predecessor is the head they retry the
 * hook, otherwise they make sure someone will signal them, then park. A
 * wakeup is only a hint to re-check.
 *
 * # Aborts
 *
 * A queued attempt that does not end in acquisition (interrupt, timeout,
 * hook error or panic) is cancelled by a drop guard, so the node is always
 * unspliced before the failure reaches the caller.
 */

use super::condition::Condition;
use super::config::SyncConfig;
use super::node::{Mode, Node, NodeRef, WaitStatus};
use super::parker::ThreadHandle;
use super::policy::SyncPolicy;
use super::queue::WaitQueue;
use super::state::SyncState;
use crate::core::errors::{SyncError, SyncResult};
use std::fmt;
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Cancels a queued node unless disarmed on successful acquisition
struct CancelOnExit<'q> {
    queue: &'q WaitQueue,
    node: Option<NodeRef>,
}

impl<'q> CancelOnExit<'q> {
    fn new(queue: &'q WaitQueue, node: &NodeRef) -> Self {
        Self {
            queue,
            node: Some(node.clone()),
        }
    }

    fn disarm(mut self) {
        self.node = None;
    }
}

impl Drop for CancelOnExit<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.queue.cancel(&node);
        }
    }
}

/// Blocking synchronizer built from a [`SyncPolicy`]
///
/// # Examples
///
/// ```
/// use clh_sync::core::sync::{QueuedSynchronizer, SyncPolicy, SyncState, ThreadHandle};
/// use clh_sync::core::SyncResult;
///
/// struct Mutex;
///
/// impl SyncPolicy for Mutex {
///     fn try_acquire(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
///         Ok(state.compare_and_set(0, 1))
///     }
///     fn try_release(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
///         state.set(0);
///         Ok(true)
///     }
///     fn is_held_exclusively(&self, state: &SyncState) -> SyncResult<bool> {
///         Ok(state.get() == 1)
///     }
/// }
///
/// let sync = QueuedSynchronizer::new(Mutex);
/// let me = ThreadHandle::current();
/// sync.acquire(&me, 1).unwrap();
/// assert_eq!(sync.current_state(), 1);
/// assert!(sync.release(1).unwrap());
/// ```
///
/// The state can only be written from inside the policy hooks:
///
/// ```compile_fail
/// # use clh_sync::core::sync::{QueuedSynchronizer, SyncPolicy};
/// # struct Nothing;
/// # impl SyncPolicy for Nothing {}
/// let sync = QueuedSynchronizer::new(Nothing);
/// sync.state().set(1);
/// ```
pub struct QueuedSynchronizer<P: SyncPolicy> {
    state: SyncState,
    policy: P,
    config: SyncConfig,
}

impl<P: SyncPolicy> QueuedSynchronizer<P> {
    pub fn new(policy: P) -> Self {
        Self::with_config(policy, SyncConfig::default())
    }

    pub fn with_config(policy: P, config: SyncConfig) -> Self {
        Self::with_state(policy, 0, config)
    }

    /// Create with a non-zero initial state (e.g. semaphore permits)
    pub fn with_state(policy: P, initial: i32, config: SyncConfig) -> Self {
        Self {
            state: SyncState::new(initial),
            policy,
            config,
        }
    }

    /// Full state access is for hooks only; outside them the state is read-only
    #[inline]
    pub(crate) fn state(&self) -> &SyncState {
        &self.state
    }

    /// Current value of the synchronization state
    #[inline]
    pub fn current_state(&self) -> i32 {
        self.state.get()
    }

    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[inline]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[inline]
    fn queue(&self) -> &WaitQueue {
        &self.state.queue
    }

    pub fn is_held_exclusively(&self) -> SyncResult<bool> {
        self.policy.is_held_exclusively(&self.state)
    }

    /// Create a condition bound to this synchronizer's exclusive mode
    pub fn new_condition(&self) -> Condition<'_, P> {
        Condition::new(self)
    }

    // =========================================================================
    // Exclusive mode
    // =========================================================================

    /// Acquire exclusively, ignoring interrupts
    ///
    /// An interrupt that arrives while queued is re-asserted on `me` once the
    /// acquisition succeeds.
    pub fn acquire(&self, me: &ThreadHandle, arg: i32) -> SyncResult<()> {
        if self.policy.try_acquire(&self.state, arg)? {
            return Ok(());
        }
        let node = self.add_waiter(me, Mode::Exclusive);
        if self.acquire_queued(&node, me, arg)? {
            me.interrupt();
        }
        Ok(())
    }

    /// Acquire exclusively, failing with `Interrupted` if `me` is interrupted
    pub fn acquire_interruptibly(&self, me: &ThreadHandle, arg: i32) -> SyncResult<()> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire(&self.state, arg)? {
            return Ok(());
        }

        let node = self.add_waiter(me, Mode::Exclusive);
        let guard = CancelOnExit::new(self.queue(), &node);
        loop {
            let pred = Self::predecessor(&node)?;
            if self.queue().is_head(&pred) && self.policy.try_acquire(&self.state, arg)? {
                self.queue().advance_head(&node);
                pred.set_next(None);
                guard.disarm();
                return Ok(());
            }
            if self.queue().should_park_after_failed_acquire(&pred, &node)
                && me.park_and_check_interrupt()
            {
                debug!("Exclusive acquire interrupted while queued");
                return Err(SyncError::Interrupted);
            }
        }
    }

    /// Acquire exclusively within `timeout`; `Ok(false)` if it elapsed
    pub fn try_acquire_for(
        &self,
        me: &ThreadHandle,
        arg: i32,
        timeout: Duration,
    ) -> SyncResult<bool> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire(&self.state, arg)? {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }

        let deadline = deadline_after(timeout);
        let node = self.add_waiter(me, Mode::Exclusive);
        let guard = CancelOnExit::new(self.queue(), &node);
        loop {
            let pred = Self::predecessor(&node)?;
            if self.queue().is_head(&pred) && self.policy.try_acquire(&self.state, arg)? {
                self.queue().advance_head(&node);
                pred.set_next(None);
                guard.disarm();
                return Ok(true);
            }
            if !self.timed_park(me, &pred, &node, deadline)? {
                debug!(?timeout, "Exclusive acquire timed out");
                return Ok(false);
            }
        }
    }

    /// Release exclusively; wakes the next waiter if the policy reports the
    /// resource fully free
    pub fn release(&self, arg: i32) -> SyncResult<bool> {
        if !self.policy.try_release(&self.state, arg)? {
            return Ok(false);
        }
        if let Some(h) = self.queue().head() {
            if h.status() != WaitStatus::None {
                self.queue().signal_successor(&h);
            }
        }
        Ok(true)
    }

    // =========================================================================
    // Shared mode
    // =========================================================================

    /// Acquire in shared mode, ignoring interrupts
    pub fn acquire_shared(&self, me: &ThreadHandle, arg: i32) -> SyncResult<()> {
        if self.policy.try_acquire_shared(&self.state, arg)? >= 0 {
            return Ok(());
        }

        let node = self.add_waiter(me, Mode::Shared);
        let guard = CancelOnExit::new(self.queue(), &node);
        let mut interrupted = false;
        loop {
            let pred = Self::predecessor(&node)?;
            if self.queue().is_head(&pred) {
                let r = self.policy.try_acquire_shared(&self.state, arg)?;
                if r >= 0 {
                    self.advance_head_and_propagate(&node, r);
                    pred.set_next(None);
                    guard.disarm();
                    if interrupted {
                        me.interrupt();
                    }
                    return Ok(());
                }
            }
            if self.queue().should_park_after_failed_acquire(&pred, &node)
                && me.park_and_check_interrupt()
            {
                interrupted = true;
            }
        }
    }

    /// Acquire in shared mode, failing with `Interrupted` if `me` is interrupted
    pub fn acquire_shared_interruptibly(&self, me: &ThreadHandle, arg: i32) -> SyncResult<()> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(&self.state, arg)? >= 0 {
            return Ok(());
        }

        let node = self.add_waiter(me, Mode::Shared);
        let guard = CancelOnExit::new(self.queue(), &node);
        loop {
            let pred = Self::predecessor(&node)?;
            if self.queue().is_head(&pred) {
                let r = self.policy.try_acquire_shared(&self.state, arg)?;
                if r >= 0 {
                    self.advance_head_and_propagate(&node, r);
                    pred.set_next(None);
                    guard.disarm();
                    return Ok(());
                }
            }
            if self.queue().should_park_after_failed_acquire(&pred, &node)
                && me.park_and_check_interrupt()
            {
                debug!("Shared acquire interrupted while queued");
                return Err(SyncError::Interrupted);
            }
        }
    }

    /// Acquire in shared mode within `timeout`; `Ok(false)` if it elapsed
    pub fn try_acquire_shared_for(
        &self,
        me: &ThreadHandle,
        arg: i32,
        timeout: Duration,
    ) -> SyncResult<bool> {
        if me.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(&self.state, arg)? >= 0 {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }

        let deadline = deadline_after(timeout);
        let node = self.add_waiter(me, Mode::Shared);
        let guard = CancelOnExit::new(self.queue(), &node);
        loop {
            let pred = Self::predecessor(&node)?;
            if self.queue().is_head(&pred) {
                let r = self.policy.try_acquire_shared(&self.state, arg)?;
                if r >= 0 {
                    self.advance_head_and_propagate(&node, r);
                    pred.set_next(None);
                    guard.disarm();
                    return Ok(true);
                }
            }
            if !self.timed_park(me, &pred, &node, deadline)? {
                debug!(?timeout, "Shared acquire timed out");
                return Ok(false);
            }
        }
    }

    /// Release in shared mode; always keeps propagation going on success
    pub fn release_shared(&self, arg: i32) -> SyncResult<bool> {
        if !self.policy.try_release_shared(&self.state, arg)? {
            return Ok(false);
        }
        self.queue().cascade_propagate_release();
        Ok(true)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Whether any thread may be waiting to acquire
    #[inline]
    pub fn has_queued_threads(&self) -> bool {
        self.state.has_queued_threads()
    }

    /// Whether any thread has ever had to queue
    #[inline]
    pub fn has_contended(&self) -> bool {
        self.state.has_contended()
    }

    /// Whether some other thread has been waiting longer than the caller
    pub fn has_queued_predecessors(&self) -> bool {
        self.state.has_queued_predecessors()
    }

    pub fn apparently_first_queued_is_exclusive(&self) -> bool {
        self.state.apparently_first_queued_is_exclusive()
    }

    pub fn first_queued_thread(&self) -> Option<ThreadId> {
        self.state.first_queued_thread()
    }

    pub fn is_queued(&self, thread: &ThreadHandle) -> bool {
        self.state.is_queued(thread)
    }

    /// Estimated number of queued threads
    pub fn queue_length(&self) -> usize {
        self.state.queue_length()
    }

    /// Queued threads, most recently queued first
    pub fn queued_threads(&self) -> Vec<ThreadId> {
        self.state.queued_threads()
    }

    pub fn exclusive_queued_threads(&self) -> Vec<ThreadId> {
        self.state.exclusive_queued_threads()
    }

    pub fn shared_queued_threads(&self) -> Vec<ThreadId> {
        self.state.shared_queued_threads()
    }

    // =========================================================================
    // Engine internals
    // =========================================================================

    fn add_waiter(&self, me: &ThreadHandle, mode: Mode) -> NodeRef {
        debug_assert!(me.is_current(), "ThreadHandle used from a foreign thread");
        let node = Node::waiter(me, mode);
        self.queue().append_fast_path(&node);
        trace!(?mode, "Queued waiter");
        node
    }

    fn predecessor(node: &NodeRef) -> SyncResult<NodeRef> {
        node.prev()
            .ok_or_else(|| SyncError::IllegalState("queued node lost its predecessor".into()))
    }

    /// One timed wait step. Returns `Ok(false)` once the deadline has passed.
    fn timed_park(
        &self,
        me: &ThreadHandle,
        pred: &NodeRef,
        node: &NodeRef,
        deadline: Option<Instant>,
    ) -> SyncResult<bool> {
        let remaining = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(false);
                }
                Some(remaining)
            }
            None => None,
        };
        if self.queue().should_park_after_failed_acquire(pred, node) {
            match remaining {
                Some(remaining) if self.config.should_park_for(remaining) => {
                    me.park_timeout(remaining)
                }
                Some(_) => {}
                None => me.park(),
            }
        }
        if me.take_interrupt() {
            debug!("Timed acquire interrupted while queued");
            return Err(SyncError::Interrupted);
        }
        Ok(true)
    }

    /// Queued exclusive acquire for a node already on the wait queue.
    /// Returns whether an interrupt was swallowed along the way.
    pub(crate) fn acquire_queued(
        &self,
        node: &NodeRef,
        me: &ThreadHandle,
        arg: i32,
    ) -> SyncResult<bool> {
        let guard = CancelOnExit::new(self.queue(), node);
        let mut interrupted = false;
        loop {
            let pred = Self::predecessor(node)?;
            if self.queue().is_head(&pred) && self.policy.try_acquire(&self.state, arg)? {
                self.queue().advance_head(node);
                pred.set_next(None);
                guard.disarm();
                return Ok(interrupted);
            }
            if self.queue().should_park_after_failed_acquire(&pred, node)
                && me.park_and_check_interrupt()
            {
                interrupted = true;
            }
        }
    }

    /// Become head, then pass the wakeup on if more shared waiters may succeed
    fn advance_head_and_propagate(&self, node: &NodeRef, propagate: i32) {
        let old_head = self.queue().head();
        self.queue().advance_head(node);

        let wants_signal = |h: &Option<NodeRef>| match h {
            None => true,
            Some(h) => h.status().is_negative(),
        };
        if propagate > 0 || wants_signal(&old_head) || wants_signal(&self.queue().head()) {
            match node.next() {
                Some(s) if !s.is_shared() => {}
                _ => self.queue().cascade_propagate_release(),
            }
        }
    }

    /// Release everything held, returning the state to restore on re-acquire
    pub(crate) fn fully_release(&self, node: &NodeRef) -> SyncResult<i32> {
        let saved = self.state.get();
        match self.release(saved) {
            Ok(true) => Ok(saved),
            Ok(false) => {
                node.set_status(WaitStatus::Cancelled);
                Err(SyncError::IllegalMonitorState)
            }
            Err(e) => {
                node.set_status(WaitStatus::Cancelled);
                Err(e)
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl<P: SyncPolicy> fmt::Display for QueuedSynchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = if self.state.has_queued_threads() { "non" } else { "" };
        write!(f, "QueuedSynchronizer[state = {}, {}empty queue]", self.state.get(), q)
    }
}

impl<P: SyncPolicy> fmt::Debug for QueuedSynchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedSynchronizer")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Non-reentrant mutex: 0 unlocked, 1 locked
    struct Mutex;

    impl SyncPolicy for Mutex {
        fn try_acquire(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
            Ok(state.compare_and_set(0, 1))
        }

        fn try_release(&self, state: &SyncState, _arg: i32) -> SyncResult<bool> {
            if state.get() == 0 {
                return Err(SyncError::IllegalState("release while unlocked".into()));
            }
            state.set(0);
            Ok(true)
        }

        fn is_held_exclusively(&self, state: &SyncState) -> SyncResult<bool> {
            Ok(state.get() == 1)
        }
    }

    /// Permits counted down in shared mode
    struct Permits;

    impl SyncPolicy for Permits {
        fn try_acquire_shared(&self, state: &SyncState, arg: i32) -> SyncResult<i32> {
            loop {
                let available = state.get();
                let remaining = available - arg;
                if remaining < 0 || state.compare_and_set(available, remaining) {
                    return Ok(remaining);
                }
            }
        }

        fn try_release_shared(&self, state: &SyncState, arg: i32) -> SyncResult<bool> {
            loop {
                let current = state.get();
                if state.compare_and_set(current, current + arg) {
                    return Ok(true);
                }
            }
        }
    }

    /// Fails the first hook call that happens on the queued path
    struct Exploding {
        calls: AtomicUsize,
    }

    impl SyncPolicy for Exploding {
        fn try_acquire(&self, _state: &SyncState, _arg: i32) -> SyncResult<bool> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(false)
            } else {
                Err(SyncError::IllegalState("boom".into()))
            }
        }
    }

    #[test]
    fn test_uncontended_fast_path_never_queues() {
        let sync = QueuedSynchronizer::new(Mutex);
        let me = ThreadHandle::current();

        sync.acquire(&me, 1).unwrap();
        assert!(sync.release(1).unwrap());
        assert!(!sync.has_contended());
    }

    #[test]
    fn test_unsupported_mode_surfaces() {
        let sync = QueuedSynchronizer::new(Mutex);
        let me = ThreadHandle::current();

        assert_eq!(
            sync.acquire_shared(&me, 1),
            Err(SyncError::UnsupportedMode("try_acquire_shared"))
        );
        assert_eq!(
            sync.release_shared(1),
            Err(SyncError::UnsupportedMode("try_release_shared"))
        );
    }

    #[test]
    fn test_release_illegal_state() {
        let sync = QueuedSynchronizer::new(Mutex);
        assert!(matches!(sync.release(1), Err(SyncError::IllegalState(_))));
    }

    #[test]
    fn test_hook_error_cancels_node() {
        let sync = QueuedSynchronizer::new(Exploding {
            calls: AtomicUsize::new(0),
        });
        let me = ThreadHandle::current();

        let result = sync.acquire(&me, 1);
        assert!(matches!(result, Err(SyncError::IllegalState(_))));
        assert!(!sync.is_queued(&me));
        assert_eq!(sync.queue_length(), 0);
    }

    #[test]
    fn test_interrupted_before_acquire() {
        let sync = QueuedSynchronizer::new(Mutex);
        let me = ThreadHandle::current();
        me.interrupt();

        assert_eq!(sync.acquire_interruptibly(&me, 1), Err(SyncError::Interrupted));
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn test_zero_timeout_does_not_queue() {
        let sync = QueuedSynchronizer::new(Mutex);
        let me = ThreadHandle::current();
        sync.acquire(&me, 1).unwrap();

        assert!(!sync.try_acquire_for(&me, 1, Duration::ZERO).unwrap());
        assert!(!sync.has_contended());
    }

    #[test]
    fn test_exclusive_handoff() {
        let sync = Arc::new(QueuedSynchronizer::new(Mutex));
        let me = ThreadHandle::current();
        sync.acquire(&me, 1).unwrap();

        let sync_clone = sync.clone();
        let waiter = thread::spawn(move || {
            let me = ThreadHandle::current();
            sync_clone.acquire(&me, 1).unwrap();
            sync_clone.release(1).unwrap();
        });

        while !sync.has_queued_threads() {
            thread::yield_now();
        }
        assert!(sync.to_string().contains("nonempty queue"));
        sync.release(1).unwrap();
        waiter.join().unwrap();
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn test_shared_permits() {
        let sync = Arc::new(QueuedSynchronizer::with_state(
            Permits,
            0,
            SyncConfig::default(),
        ));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let sync = sync.clone();
                thread::spawn(move || {
                    let me = ThreadHandle::current();
                    sync.acquire_shared(&me, 1).unwrap();
                })
            })
            .collect();

        while sync.queue_length() < 3 {
            thread::yield_now();
        }
        assert_eq!(sync.shared_queued_threads().len(), 3);
        sync.release_shared(3).unwrap();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn test_display_uncontended() {
        let sync = QueuedSynchronizer::new(Mutex);
        assert_eq!(sync.to_string(), "QueuedSynchronizer[state = 0, empty queue]");
    }
}
