/*!
 * CLH Sync - Demo Entry Point
 *
 * Exercises the reference primitives end to end:
 * - contended exclusive lock with a condition handoff
 * - boolean latch releasing a group of waiters
 * - timed acquisition giving up cleanly
 */

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

use clh_sync::{
    init_tracing, BooleanLatch, ExclusiveLock, SyncConfig, SyncError, SyncResult, ThreadHandle,
};

const WORKERS: usize = 4;
const ROUNDS: usize = 1_000;

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let config = SyncConfig::from_env();
    info!(spin_threshold = ?config.spin_threshold, "CLH sync demo starting...");

    run_contended_lock(config)?;
    run_condition_handoff(config)?;
    run_latch()?;
    run_timed_acquire(config)?;

    info!("Demo complete");
    Ok(())
}

fn run_contended_lock(config: SyncConfig) -> SyncResult<()> {
    let lock = Arc::new(ExclusiveLock::with_config(false, config));
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let lock = lock.clone();
            let counter = counter.clone();
            thread::spawn(move || -> SyncResult<()> {
                for _ in 0..ROUNDS {
                    let _guard = lock.guard()?;
                    // Non-atomic read-modify-write, protected by the lock
                    let seen = counter.load(Ordering::Relaxed);
                    counter.store(seen + 1, Ordering::Relaxed);
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().map_err(|_| SyncError::IllegalState("worker panicked".into()))??;
    }

    info!(
        total = counter.load(Ordering::Relaxed),
        expected = WORKERS * ROUNDS,
        elapsed = ?start.elapsed(),
        "Contended lock finished"
    );
    Ok(())
}

fn run_condition_handoff(config: SyncConfig) -> SyncResult<()> {
    let lock = ExclusiveLock::with_config(true, config);
    let ready = AtomicUsize::new(0);
    let cond = lock.new_condition();

    thread::scope(|s| -> SyncResult<()> {
        let consumer = s.spawn(|| -> SyncResult<usize> {
            lock.lock()?;
            let me = ThreadHandle::current();
            while ready.load(Ordering::Relaxed) == 0 {
                cond.wait(&me)?;
            }
            let value = ready.load(Ordering::Relaxed);
            lock.unlock()?;
            Ok(value)
        });

        // Wait until the consumer is parked on the condition
        loop {
            lock.lock()?;
            let waiting = lock.sync().has_waiters(&cond)?;
            if waiting {
                ready.store(42, Ordering::Relaxed);
                cond.signal()?;
                lock.unlock()?;
                break;
            }
            lock.unlock()?;
            thread::yield_now();
        }

        let value = consumer
            .join()
            .map_err(|_| SyncError::IllegalState("consumer panicked".into()))??;
        info!(value, "Condition handoff finished");
        Ok(())
    })
}

fn run_latch() -> SyncResult<()> {
    let latch = Arc::new(BooleanLatch::new());
    let waiters: Vec<_> = (0..WORKERS)
        .map(|_| {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        })
        .collect();

    while latch.sync().queue_length() < WORKERS {
        thread::yield_now();
    }
    info!(waiting = latch.sync().queue_length(), "Opening latch");
    latch.signal()?;

    for waiter in waiters {
        waiter.join().map_err(|_| SyncError::IllegalState("waiter panicked".into()))??;
    }
    info!("Latch released all waiters");
    Ok(())
}

fn run_timed_acquire(config: SyncConfig) -> SyncResult<()> {
    let lock = Arc::new(ExclusiveLock::with_config(false, config));
    lock.lock()?;

    let other = lock.clone();
    let outcome = thread::spawn(move || {
        let start = Instant::now();
        other.try_lock_for(Duration::from_millis(50)).map(|ok| (ok, start.elapsed()))
    })
    .join()
    .map_err(|_| SyncError::IllegalState("timed waiter panicked".into()))??;

    info!(acquired = outcome.0, waited = ?outcome.1, "Timed acquire finished");
    lock.unlock()?;
    info!("{}", lock);
    Ok(())
}
