//! The background garbage collector for signed states.
//!
//! A single worker thread consumes archive and delete intents queued by the
//! reservation destruction callbacks. The loop is tickless: the worker
//! parks on a condvar and wakes only when an intent arrives or shutdown is
//! requested. Intents are processed in bounded slices so a burst of evicted
//! states cannot starve shutdown observation.

use crate::metrics::gc_metrics;
use crate::signed_state::SignedState;
use keel_telemetry::LogRateLimiter;
use keel_types::config::SignedStateConfig;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

const INLINE_DELETE_WARN_PERIOD: Duration = Duration::from_secs(60);

struct GcQueues {
    archive: VecDeque<Arc<SignedState>>,
    delete: VecDeque<Arc<SignedState>>,
}

struct GcShared {
    queues: Mutex<GcQueues>,
    wake: Condvar,
    stopped: AtomicBool,
    delete_capacity: usize,
    drain_limit: usize,
    inline_warn: Mutex<LogRateLimiter>,
}

/// The collector: owns the worker thread and the intake queues.
pub struct SignedStateGarbageCollector {
    shared: Arc<GcShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SignedStateGarbageCollector {
    /// Starts the worker thread.
    pub fn start(config: &SignedStateConfig) -> Self {
        let shared = Arc::new(GcShared {
            queues: Mutex::new(GcQueues {
                archive: VecDeque::new(),
                delete: VecDeque::new(),
            }),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            delete_capacity: config.gc_queue_capacity,
            drain_limit: config.gc_drain_limit.max(1),
            inline_warn: Mutex::new(LogRateLimiter::new(INLINE_DELETE_WARN_PERIOD)),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("keel-state-gc".into())
            .spawn(move || run_worker(worker_shared))
            .ok();
        if worker.is_none() {
            // Without a worker every intent is rejected and hooks run
            // inline, which is correct, just slower for the callers.
            tracing::error!(target: "gc", "failed to spawn collector thread; falling back to inline processing");
            shared.stopped.store(true, Ordering::Release);
        }

        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// An intake handle for wiring into signed states.
    pub fn handle(&self) -> GcHandle {
        GcHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Signals the worker to stop, lets it drain the queues best-effort,
    /// and joins it.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(target: "gc", "collector thread panicked during shutdown");
            }
        }
    }
}

impl Drop for SignedStateGarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: Arc<GcShared>) {
    loop {
        let (archive_batch, delete_batch, stopping) = {
            let mut queues = shared.queues.lock();
            loop {
                if shared.stopped.load(Ordering::Acquire)
                    || !queues.archive.is_empty()
                    || !queues.delete.is_empty()
                {
                    break;
                }
                shared.wake.wait(&mut queues);
            }
            let stopping = shared.stopped.load(Ordering::Acquire);
            let limit = if stopping {
                usize::MAX
            } else {
                shared.drain_limit
            };
            let archive_take = queues.archive.len().min(limit);
            let delete_take = queues.delete.len().min(limit);
            let archive_batch: Vec<_> = queues.archive.drain(..archive_take).collect();
            let delete_batch: Vec<_> = queues.delete.drain(..delete_take).collect();
            gc_metrics().set_archive_queue_depth(queues.archive.len() as u64);
            gc_metrics().set_delete_queue_depth(queues.delete.len() as u64);
            (archive_batch, delete_batch, stopping)
        };

        // Archive intents first: a state whose delete intent shares this
        // pass always observes archive-before-delete.
        for state in &archive_batch {
            state.try_archive();
        }
        for state in &delete_batch {
            state.try_delete();
        }

        if stopping {
            break;
        }
    }
}

/// A clonable intake handle to the collector.
///
/// Handles hold the collector weakly: once the collector is stopped or
/// dropped, every intent is handed back to the caller for inline
/// processing.
#[derive(Clone)]
pub struct GcHandle {
    shared: Weak<GcShared>,
}

impl GcHandle {
    /// A handle connected to no collector. Every intent is rejected, so
    /// archive and delete hooks run inline on the releasing thread. Useful
    /// for tests and embedders that forgo background collection.
    pub fn detached() -> Self {
        Self {
            shared: Weak::new(),
        }
    }

    /// Queues an archive intent. On rejection the state is handed back and
    /// the caller must archive inline.
    pub fn archive_background(
        &self,
        state: Arc<SignedState>,
    ) -> Result<(), Arc<SignedState>> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(state);
        };
        if shared.stopped.load(Ordering::Acquire) {
            return Err(state);
        }
        let mut queues = shared.queues.lock();
        queues.archive.push_back(state);
        gc_metrics().set_archive_queue_depth(queues.archive.len() as u64);
        drop(queues);
        shared.wake.notify_one();
        Ok(())
    }

    /// Queues a delete intent. The delete queue is bounded: on overflow the
    /// state is handed back for inline deletion and a rate-limited warning
    /// records the fallback.
    pub fn delete_background(
        &self,
        state: Arc<SignedState>,
    ) -> Result<(), Arc<SignedState>> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(state);
        };
        if shared.stopped.load(Ordering::Acquire) {
            return Err(state);
        }
        let mut queues = shared.queues.lock();
        if queues.delete.len() >= shared.delete_capacity {
            drop(queues);
            gc_metrics().inc_inline_deletions();
            if let Some(suppressed) = shared.inline_warn.lock().check() {
                tracing::warn!(
                    target: "gc",
                    round = state.round(),
                    suppressed,
                    "delete queue full; deleting state inline on the releasing thread"
                );
            }
            return Err(state);
        }
        queues.delete.push_back(state);
        gc_metrics().set_delete_queue_depth(queues.delete.len() as u64);
        drop(queues);
        shared.wake.notify_one();
        Ok(())
    }
}
