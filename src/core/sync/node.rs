/*!
 * Waiter Nodes
 *
 * One node per thread per blocking attempt. Nodes are reference counted and
 * linked through `ArcSwapOption` fields, so a node stays alive for as long
 * as any thread can still reach it through a stale link.
 *
 * # Link discipline
 *
 * - `prev` is set before the tail CAS publishes the node and afterwards only
 *   moves backward to skip cancelled predecessors
 * - `next` is written after the tail CAS, so `None` never proves "no successor"
 * - forward links are cleared once a node is unreachable, which breaks the
 *   `prev`/`next` reference cycle between neighbours
 */

use super::parker::{HandleInner, ThreadHandle};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

pub(crate) type NodeRef = Arc<Node>;

/// Waiter status
///
/// Negative values mean "nothing to do yet"; `Cancelled` is the only positive
/// value and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub(crate) enum WaitStatus {
    /// Initial status of a wait queue node
    None = 0,
    /// Successor is (or will soon be) parked and must be woken on release
    Signal = -1,
    /// Node sits on a condition queue
    Condition = -2,
    /// A shared release must keep propagating
    Propagate = -3,
    /// Timed out or interrupted; never changes again
    Cancelled = 1,
}

impl WaitStatus {
    #[inline]
    const fn from_raw(raw: i32) -> Self {
        match raw {
            -1 => WaitStatus::Signal,
            -2 => WaitStatus::Condition,
            -3 => WaitStatus::Propagate,
            1 => WaitStatus::Cancelled,
            _ => WaitStatus::None,
        }
    }

    #[inline]
    pub(crate) const fn is_cancelled(self) -> bool {
        matches!(self, WaitStatus::Cancelled)
    }

    /// Negative statuses: no action required by the node itself yet
    #[inline]
    pub(crate) const fn is_negative(self) -> bool {
        (self as i32) < 0
    }
}

/// Acquisition mode of a wait queue node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Exclusive,
    Shared,
}

pub(crate) struct Node {
    status: AtomicI32,
    prev: ArcSwapOption<Node>,
    next: ArcSwapOption<Node>,
    thread: ArcSwapOption<HandleInner>,
    /// Next node on a condition queue
    next_waiter: ArcSwapOption<Node>,
    mode: Mode,
}

impl Node {
    /// Placeholder head installed on first contention
    pub(crate) fn sentinel() -> NodeRef {
        Arc::new(Self::with_status(None, Mode::Exclusive, WaitStatus::None))
    }

    /// Wait queue node for `thread`
    pub(crate) fn waiter(thread: &ThreadHandle, mode: Mode) -> NodeRef {
        Arc::new(Self::with_status(Some(thread), mode, WaitStatus::None))
    }

    /// Condition queue node for `thread`
    pub(crate) fn condition_waiter(thread: &ThreadHandle) -> NodeRef {
        Arc::new(Self::with_status(
            Some(thread),
            Mode::Exclusive,
            WaitStatus::Condition,
        ))
    }

    fn with_status(thread: Option<&ThreadHandle>, mode: Mode, status: WaitStatus) -> Self {
        Self {
            status: AtomicI32::new(status as i32),
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            thread: ArcSwapOption::new(thread.map(|t| Arc::clone(t.inner()))),
            next_waiter: ArcSwapOption::empty(),
            mode,
        }
    }

    #[inline]
    pub(crate) fn status(&self) -> WaitStatus {
        WaitStatus::from_raw(self.status.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: WaitStatus) {
        self.status.store(status as i32, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn cas_status(&self, expect: WaitStatus, update: WaitStatus) -> bool {
        self.status
            .compare_exchange(
                expect as i32,
                update as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    #[inline]
    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub(crate) fn is_shared(&self) -> bool {
        self.mode == Mode::Shared
    }

    #[inline]
    pub(crate) fn prev(&self) -> Option<NodeRef> {
        self.prev.load_full()
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: Option<NodeRef>) {
        self.prev.store(prev);
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<NodeRef> {
        self.next.load_full()
    }

    #[inline]
    pub(crate) fn set_next(&self, next: Option<NodeRef>) {
        self.next.store(next);
    }

    #[inline]
    pub(crate) fn cas_next(&self, expect: &Option<NodeRef>, update: Option<NodeRef>) -> bool {
        cas_link(&self.next, expect, update)
    }

    pub(crate) fn thread(&self) -> Option<ThreadHandle> {
        self.thread.load_full().map(ThreadHandle::from_inner)
    }

    #[inline]
    pub(crate) fn has_thread(&self) -> bool {
        self.thread.load().is_some()
    }

    /// Whether the node still belongs to the thread behind `handle`
    pub(crate) fn is_owned_by(&self, handle: &ThreadHandle) -> bool {
        matches!(&*self.thread.load(), Some(inner) if Arc::ptr_eq(inner, handle.inner()))
    }

    #[inline]
    pub(crate) fn clear_thread(&self) {
        self.thread.store(None);
    }

    #[inline]
    pub(crate) fn next_waiter(&self) -> Option<NodeRef> {
        self.next_waiter.load_full()
    }

    #[inline]
    pub(crate) fn set_next_waiter(&self, next: Option<NodeRef>) {
        self.next_waiter.store(next);
    }

    /// Wake the owning thread, if it is still attached
    pub(crate) fn unpark_thread(&self) {
        if let Some(thread) = self.thread() {
            thread.unpark();
        }
    }
}

/// Pointer identity for optional node links
#[inline]
pub(crate) fn same_node(a: &Option<NodeRef>, b: &Option<NodeRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Whether `link` currently holds exactly `node`
#[inline]
pub(crate) fn is_node(link: &Option<NodeRef>, node: &NodeRef) -> bool {
    matches!(link, Some(n) if Arc::ptr_eq(n, node))
}

/// Compare-and-swap on a node link, by pointer identity
pub(crate) fn cas_link(
    link: &ArcSwapOption<Node>,
    expect: &Option<NodeRef>,
    update: Option<NodeRef>,
) -> bool {
    let previous = link.compare_and_swap(expect, update);
    same_node(&*previous, expect)
}
