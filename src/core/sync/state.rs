/*!
 * Synchronization State
 *
 * The single atomic integer whose meaning belongs to the policy, plus the wait
 * queue it guards. Policy hooks receive a `&SyncState`, which gives them the
 * state accessors and the read-only queue queries (e.g. fairness checks).
 *
 * All queue queries are snapshots: under concurrency they are estimates.
 */

use super::node::{same_node, Mode};
use super::parker::ThreadHandle;
use super::queue::WaitQueue;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, ThreadId};

pub struct SyncState {
    value: AtomicI32,
    pub(crate) queue: WaitQueue,
}

impl SyncState {
    pub(crate) fn new(initial: i32) -> Self {
        Self {
            value: AtomicI32::new(initial),
            queue: WaitQueue::new(),
        }
    }

    #[inline]
    pub fn get(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set(&self, value: i32) {
        self.value.store(value, Ordering::SeqCst);
    }

    #[inline]
    pub fn compare_and_set(&self, expect: i32, update: i32) -> bool {
        self.value
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether any thread may be waiting to acquire
    #[inline]
    pub fn has_queued_threads(&self) -> bool {
        !same_node(&self.queue.head(), &self.queue.tail())
    }

    /// Whether any thread has ever had to queue
    #[inline]
    pub fn has_contended(&self) -> bool {
        self.queue.head().is_some()
    }

    /// Whether some other thread has been waiting longer than the caller
    ///
    /// A fair policy calls this from its hooks before barging.
    pub fn has_queued_predecessors(&self) -> bool {
        // Read tail before head: the head is initialised before the tail
        let t = self.queue.tail();
        let h = self.queue.head();
        match &h {
            Some(head) if !same_node(&h, &t) => match head.next() {
                None => true,
                Some(s) => match s.thread() {
                    Some(owner) => owner.thread_id() != thread::current().id(),
                    None => true,
                },
            },
            _ => false,
        }
    }

    /// Whether the first queued thread, if any, waits in exclusive mode
    pub fn apparently_first_queued_is_exclusive(&self) -> bool {
        self.queue
            .head()
            .and_then(|h| h.next())
            .map(|s| !s.is_shared() && s.has_thread())
            .unwrap_or(false)
    }

    /// The thread that has been queued the longest
    pub fn first_queued_thread(&self) -> Option<ThreadId> {
        if !self.has_queued_threads() {
            return None;
        }

        // Fast path: head.next, valid only if it still points back at head
        if let Some(h) = self.queue.head() {
            if let Some(s) = h.next() {
                if same_node(&s.prev(), &Some(h.clone())) {
                    if let Some(owner) = s.thread() {
                        return Some(owner.thread_id());
                    }
                }
            }
        }

        // next links may lag: the last one found from the tail is the first
        let mut first = None;
        let mut cursor = self.queue.tail();
        while let Some(t) = cursor {
            if self.queue.is_head(&t) {
                break;
            }
            if let Some(owner) = t.thread() {
                first = Some(owner.thread_id());
            }
            cursor = t.prev();
        }
        first
    }

    /// Whether `thread` currently has a node in the wait queue
    pub fn is_queued(&self, thread: &ThreadHandle) -> bool {
        let mut found = false;
        self.queue.for_each_from_tail(|node| {
            found |= node.is_owned_by(thread);
        });
        found
    }

    /// Estimated number of queued threads
    pub fn queue_length(&self) -> usize {
        let mut n = 0;
        self.queue.for_each_from_tail(|node| {
            if node.has_thread() {
                n += 1;
            }
        });
        n
    }

    /// Queued threads, most recently queued first
    pub fn queued_threads(&self) -> Vec<ThreadId> {
        self.collect_threads(None)
    }

    pub fn exclusive_queued_threads(&self) -> Vec<ThreadId> {
        self.collect_threads(Some(Mode::Exclusive))
    }

    pub fn shared_queued_threads(&self) -> Vec<ThreadId> {
        self.collect_threads(Some(Mode::Shared))
    }

    fn collect_threads(&self, mode: Option<Mode>) -> Vec<ThreadId> {
        let mut threads = Vec::new();
        self.queue.for_each_from_tail(|node| {
            if mode.map_or(true, |m| node.mode() == m) {
                if let Some(owner) = node.thread() {
                    threads.push(owner.thread_id());
                }
            }
        });
        threads
    }
}

impl std::fmt::Debug for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncState")
            .field("value", &self.get())
            .field("queued", &self.has_queued_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::node::Node;

    #[test]
    fn test_state_cas() {
        let state = SyncState::new(0);
        assert!(state.compare_and_set(0, 1));
        assert!(!state.compare_and_set(0, 2));
        assert_eq!(state.get(), 1);

        state.set(7);
        assert_eq!(state.get(), 7);
    }

    #[test]
    fn test_uncontended_queries() {
        let state = SyncState::new(0);
        assert!(!state.has_contended());
        assert!(!state.has_queued_threads());
        assert!(!state.has_queued_predecessors());
        assert_eq!(state.first_queued_thread(), None);
        assert_eq!(state.queue_length(), 0);
    }

    #[test]
    fn test_queue_queries_with_waiters() {
        let state = SyncState::new(0);
        let me = ThreadHandle::current();
        let exclusive = Node::waiter(&me, Mode::Exclusive);
        let shared = Node::waiter(&me, Mode::Shared);
        state.queue.enqueue(&exclusive);
        state.queue.enqueue(&shared);

        assert!(state.has_contended());
        assert!(state.has_queued_threads());
        assert!(state.is_queued(&me));
        assert_eq!(state.queue_length(), 2);
        assert_eq!(state.first_queued_thread(), Some(me.thread_id()));
        assert!(state.apparently_first_queued_is_exclusive());
        assert_eq!(state.exclusive_queued_threads().len(), 1);
        assert_eq!(state.shared_queued_threads().len(), 1);

        // The first waiter is our own node, so we have no predecessor
        assert!(!state.has_queued_predecessors());
    }
}
