/*!
 * Thread Handle
 *
 * Per-thread blocking primitive and interruption flag.
 *
 * # Design
 *
 * Parks on `parking_lot_core` keyed by the handle's own heap address, with a
 * one-shot permit in front of it:
 * - `unpark` before `park` is remembered, the next `park` returns at once
 * - the permit is checked again under the bucket lock, so a concurrent
 *   `unpark` can never slip between the check and the sleep
 * - spurious returns are allowed, callers always re-check their condition
 */

use parking_lot_core::{park, unpark_one, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

pub(crate) struct HandleInner {
    thread_id: ThreadId,
    name: Option<String>,
    permit: AtomicBool,
    interrupted: AtomicBool,
}

/// Handle to a thread that may block inside a synchronizer
///
/// Create it on the thread it represents with [`ThreadHandle::current`], then
/// clone it freely: other threads use their clone to [`interrupt`] or
/// [`unpark`] the owner. Only the owning thread may park.
///
/// [`interrupt`]: ThreadHandle::interrupt
/// [`unpark`]: ThreadHandle::unpark
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<HandleInner>,
}

thread_local! {
    static CURRENT: ThreadHandle = ThreadHandle::fresh();
}

impl ThreadHandle {
    /// Handle for the calling thread
    ///
    /// Every call on the same thread returns a clone of the same handle, so
    /// an interrupt delivered through any clone is seen by all of them.
    pub fn current() -> Self {
        CURRENT
            .try_with(ThreadHandle::clone)
            .unwrap_or_else(|_| Self::fresh())
    }

    fn fresh() -> Self {
        let current = thread::current();
        Self {
            inner: Arc::new(HandleInner {
                thread_id: current.id(),
                name: current.name().map(str::to_owned),
                permit: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<HandleInner> {
        &self.inner
    }

    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread_id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Whether this handle belongs to the calling thread
    #[inline]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Parking key: stable for as long as any clone is alive
    #[inline]
    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Block until unparked (or spuriously woken)
    pub fn park(&self) {
        self.park_deadline(None);
    }

    /// Block until unparked or `timeout` elapses
    pub fn park_timeout(&self, timeout: Duration) {
        self.park_deadline(Instant::now().checked_add(timeout));
    }

    /// Block until unparked or `deadline` passes
    pub fn park_until(&self, deadline: Instant) {
        self.park_deadline(Some(deadline));
    }

    fn park_deadline(&self, deadline: Option<Instant>) {
        debug_assert!(self.is_current(), "ThreadHandle parked from a foreign thread");

        if self.inner.permit.swap(false, Ordering::AcqRel) {
            return;
        }

        // SAFETY: the key is the address of our own live HandleInner, and none
        // of the callbacks call back into parking_lot_core.
        unsafe {
            park(
                self.key(),
                || !self.inner.permit.load(Ordering::Acquire),
                || {},
                |_key, _was_last| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            );
        }

        // Consume the permit that woke us, if any
        self.inner.permit.store(false, Ordering::Release);
    }

    /// Make the permit available and wake the owner if it is parked
    pub fn unpark(&self) {
        self.inner.permit.store(true, Ordering::Release);
        // SAFETY: same key as park; the callback only returns a token.
        unsafe {
            unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
        }
    }

    /// Request interruption: set the flag and wake the owner
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        self.unpark();
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Read and clear the interruption flag
    #[inline]
    pub fn take_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Park and report whether an interruption was pending afterwards (clearing it)
    pub(crate) fn park_and_check_interrupt(&self) -> bool {
        self.park();
        self.take_interrupt()
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ThreadHandle {}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("thread_id", &self.inner.thread_id)
            .field("name", &self.inner.name)
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpark_before_park() {
        let me = ThreadHandle::current();
        me.unpark();

        let start = Instant::now();
        me.park_timeout(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_park_timeout_elapses() {
        let me = ThreadHandle::current();
        let start = Instant::now();
        me.park_timeout(Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_park_until_deadline() {
        let me = ThreadHandle::current();
        let deadline = Instant::now() + Duration::from_millis(20);
        me.park_until(deadline);
        assert!(Instant::now() >= deadline);

        // A deadline in the past returns at once
        let start = Instant::now();
        me.park_until(start);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unpark_from_other_thread() {
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = thread::spawn(move || {
            let me = ThreadHandle::current();
            tx.send(me.clone()).unwrap();
            let start = Instant::now();
            me.park_timeout(Duration::from_secs(5));
            start.elapsed()
        });

        let handle = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.unpark();

        assert!(waiter.join().unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn test_interrupt_sets_flag_and_wakes() {
        let me = ThreadHandle::current();
        let other = me.clone();
        other.interrupt();

        assert!(me.is_interrupted());
        assert!(me.park_and_check_interrupt());
        assert!(!me.is_interrupted());
        assert!(!me.take_interrupt());
    }

    #[test]
    fn test_identity() {
        let me = ThreadHandle::current();
        assert!(me.is_current());
        assert_eq!(me.thread_id(), thread::current().id());
        assert_eq!(me, me.clone());
        assert_eq!(me, ThreadHandle::current());

        let other = thread::spawn(ThreadHandle::current).join().unwrap();
        assert_ne!(me, other);
        assert!(!other.is_current());
    }
}
