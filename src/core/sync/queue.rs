/*!
 * CLH Wait Queue
 *
 * Intrusive doubly-linked queue of waiter nodes. There is no lock around it:
 * - enqueue is a single tail CAS, the head placeholder is installed lazily
 * - the head only moves forward, by the thread whose node becomes head
 * - cancellation unsplices cooperatively, any thread may help skip dead nodes
 *
 * The backward `prev` chain from the tail is always complete; the forward
 * `next` chain may lag behind it, so every search that must not miss a live
 * waiter falls back to walking `prev` from the tail.
 */

use super::node::{cas_link, is_node, same_node, Node, NodeRef, WaitStatus};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct WaitQueue {
    head: ArcSwapOption<Node>,
    tail: ArcSwapOption<Node>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
            tail: ArcSwapOption::empty(),
        }
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<NodeRef> {
        self.head.load_full()
    }

    #[inline]
    pub(crate) fn tail(&self) -> Option<NodeRef> {
        self.tail.load_full()
    }

    #[inline]
    pub(crate) fn is_head(&self, node: &NodeRef) -> bool {
        is_node(&*self.head.load(), node)
    }

    /// Append `node` at the tail, installing the placeholder head first if the
    /// queue was never contended. Returns the predecessor seen by the winning CAS.
    pub(crate) fn enqueue(&self, node: &NodeRef) -> NodeRef {
        loop {
            match self.tail() {
                None => {
                    let sentinel = Node::sentinel();
                    if cas_link(&self.head, &None, Some(sentinel.clone())) {
                        trace!("Installed wait queue placeholder head");
                        self.tail.store(Some(sentinel));
                    }
                }
                Some(t) => {
                    node.set_prev(Some(t.clone()));
                    if cas_link(&self.tail, &Some(t.clone()), Some(node.clone())) {
                        t.set_next(Some(node.clone()));
                        return t;
                    }
                }
            }
        }
    }

    /// One optimistic tail CAS, falling back to the full [`enqueue`] loop
    ///
    /// [`enqueue`]: WaitQueue::enqueue
    pub(crate) fn append_fast_path(&self, node: &NodeRef) {
        if let Some(pred) = self.tail() {
            node.set_prev(Some(pred.clone()));
            if cas_link(&self.tail, &Some(pred.clone()), Some(node.clone())) {
                pred.set_next(Some(node.clone()));
                return;
            }
        }
        self.enqueue(node);
    }

    /// Install `node` as head after its thread acquired; forgets its thread
    /// and back-link. Only the node's own thread calls this.
    pub(crate) fn advance_head(&self, node: &NodeRef) {
        self.head.store(Some(node.clone()));
        node.clear_thread();
        node.set_prev(None);
    }

    /// Wake the nearest live successor of `node`, if any
    pub(crate) fn signal_successor(&self, node: &NodeRef) {
        let ws = node.status();
        if ws.is_negative() {
            // Failure is fine: the waiter may have changed it already.
            node.cas_status(ws, WaitStatus::None);
        }

        let mut successor = node.next().filter(|s| !s.status().is_cancelled());
        if successor.is_none() {
            let mut cursor = self.tail();
            while let Some(t) = cursor {
                if Arc::ptr_eq(&t, node) {
                    break;
                }
                if !t.status().is_cancelled() {
                    successor = Some(t.clone());
                }
                cursor = t.prev();
            }
        }

        if let Some(s) = successor {
            s.unpark_thread();
        }
    }

    /// Shared release: keep signalling or marking the head until it settles
    pub(crate) fn cascade_propagate_release(&self) {
        loop {
            let h = self.head();
            if let Some(head) = &h {
                if !same_node(&h, &self.tail()) {
                    match head.status() {
                        WaitStatus::Signal => {
                            if !head.cas_status(WaitStatus::Signal, WaitStatus::None) {
                                continue;
                            }
                            self.signal_successor(head);
                        }
                        WaitStatus::None => {
                            if !head.cas_status(WaitStatus::None, WaitStatus::Propagate) {
                                continue;
                            }
                        }
                        _ => {}
                    }
                }
            }
            if same_node(&h, &self.head()) {
                break;
            }
        }
    }

    /// Give up a queued acquisition attempt
    pub(crate) fn cancel(&self, node: &NodeRef) {
        node.clear_thread();

        let Some(mut pred) = node.prev() else {
            node.set_status(WaitStatus::Cancelled);
            return;
        };
        while pred.status().is_cancelled() {
            match pred.prev() {
                Some(p) => {
                    node.set_prev(Some(p.clone()));
                    pred = p;
                }
                None => break,
            }
        }

        let pred_next = pred.next();
        node.set_status(WaitStatus::Cancelled);
        trace!("Cancelled queued acquisition");

        let as_tail = Some(node.clone());
        if same_node(&self.tail(), &as_tail)
            && cas_link(&self.tail, &as_tail, Some(pred.clone()))
        {
            pred.cas_next(&pred_next, None);
            return;
        }

        if !self.is_head(&pred) && self.mark_signal(&pred) && pred.has_thread() {
            if let Some(next) = node.next() {
                if !next.status().is_cancelled() {
                    pred.cas_next(&pred_next, Some(next));
                }
            }
        } else {
            self.signal_successor(node);
        }

        // Tombstone: a cancelled node keeps no forward link
        node.set_next(None);
    }

    /// Ensure `pred` is in `Signal`; false if it is cancelled
    fn mark_signal(&self, pred: &NodeRef) -> bool {
        match pred.status() {
            WaitStatus::Signal => true,
            WaitStatus::Cancelled => false,
            ws => pred.cas_status(ws, WaitStatus::Signal),
        }
    }

    /// Decide whether a waiter whose acquire just failed may park
    pub(crate) fn should_park_after_failed_acquire(&self, pred: &NodeRef, node: &NodeRef) -> bool {
        match pred.status() {
            WaitStatus::Signal => true,
            WaitStatus::Cancelled => {
                let mut live = pred.clone();
                loop {
                    match live.prev() {
                        Some(p) => {
                            node.set_prev(Some(p.clone()));
                            live = p;
                        }
                        None => break,
                    }
                    if !live.status().is_cancelled() {
                        break;
                    }
                }
                live.set_next(Some(node.clone()));
                false
            }
            ws => {
                pred.cas_status(ws, WaitStatus::Signal);
                false
            }
        }
    }

    /// Whether `node` (a former condition waiter) now sits on this queue
    pub(crate) fn is_on_sync_queue(&self, node: &NodeRef) -> bool {
        if node.status() == WaitStatus::Condition || node.prev().is_none() {
            return false;
        }
        if node.next().is_some() {
            return true;
        }
        self.find_from_tail(node)
    }

    fn find_from_tail(&self, node: &NodeRef) -> bool {
        let mut cursor = self.tail();
        while let Some(t) = cursor {
            if Arc::ptr_eq(&t, node) {
                return true;
            }
            cursor = t.prev();
        }
        false
    }

    /// Walk every node from the tail back to the head
    pub(crate) fn for_each_from_tail(&self, mut f: impl FnMut(&NodeRef)) {
        let mut cursor = self.tail();
        while let Some(t) = cursor {
            f(&t);
            cursor = t.prev();
        }
    }
}
