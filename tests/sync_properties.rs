/*!
 * Synchronizer Property Tests
 *
 * Mutual exclusion and shared-count invariants over randomized thread
 * counts, hold times and timeouts
 */

use clh_sync::core::sync::locks::ExclusiveLock;
use clh_sync::core::sync::{QueuedSynchronizer, SyncConfig, SyncPolicy, SyncState, ThreadHandle};
use clh_sync::core::SyncResult;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Counting semaphore over the state
struct Semaphore;

impl SyncPolicy for Semaphore {
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

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_mutual_exclusion(
        threads in 2usize..6,
        rounds in 1usize..40,
        hold_us in prop::collection::vec(0u64..200, 1..8),
        fair in any::<bool>(),
    ) {
        let lock = Arc::new(ExclusiveLock::with_config(fair, SyncConfig::default()));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let hold_us = Arc::new(hold_us);

        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let lock = lock.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                let hold_us = hold_us.clone();
                thread::spawn(move || {
                    for r in 0..rounds {
                        lock.lock().unwrap();
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        let hold = hold_us[(t + r) % hold_us.len()];
                        if hold > 0 {
                            thread::sleep(Duration::from_micros(hold));
                        }
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock().unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        prop_assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        prop_assert!(!lock.is_locked());
        prop_assert_eq!(lock.sync().queue_length(), 0);
    }

    #[test]
    fn prop_semaphore_never_oversubscribed(
        permits in 1i32..4,
        threads in 2usize..8,
        timeouts_ms in prop::collection::vec(prop::option::of(1u64..10), 8),
    ) {
        let sync = Arc::new(QueuedSynchronizer::with_state(
            Semaphore,
            permits,
            SyncConfig::default(),
        ));
        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let sync = sync.clone();
                let holders = holders.clone();
                let peak = peak.clone();
                let timeout = timeouts_ms[t % timeouts_ms.len()];
                thread::spawn(move || {
                    let me = ThreadHandle::current();
                    let acquired = match timeout {
                        Some(ms) => sync
                            .try_acquire_shared_for(&me, 1, Duration::from_millis(ms))
                            .unwrap(),
                        None => {
                            sync.acquire_shared(&me, 1).unwrap();
                            true
                        }
                    };
                    if acquired {
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(200));
                        holders.fetch_sub(1, Ordering::SeqCst);
                        sync.release_shared(1).unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        prop_assert!(peak.load(Ordering::SeqCst) <= permits as usize);
        prop_assert_eq!(sync.current_state(), permits);
        prop_assert_eq!(sync.queue_length(), 0);
    }
}
