//! Worker pool that drives load coroutines.
//!
//! In-flight resources sit in one MPMC queue. A worker pops a resource, polls
//! it once and pushes it back while it is still pending, so a resource is in
//! the queue at most once and never polled by two threads at the same time.

use crate::rc::RC;
use crate::resources::resource::PollOutcome;
use crate::resources::Resource;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const RECV_TIMEOUT: Duration = Duration::from_millis(5);
const PARK_DURATION: Duration = Duration::from_millis(1);

struct SchedulerShared {
    sender: Sender<RC<dyn Resource>>,
    receiver: Receiver<RC<dyn Resource>>,
    running: AtomicBool,
    in_flight: AtomicUsize,
    backoff_limit: u32,
}

impl SchedulerShared {
    /// Poll one resource and requeue it if still pending
    fn poll_one(&self, resource: RC<dyn Resource>) -> PollOutcome {
        let outcome = resource.poll_load();
        if outcome.is_pending() {
            // both ends live in `self`, the send cannot fail
            let _ = self.sender.send(resource);
        } else {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        outcome
    }

    fn worker_loop(&self) {
        let backoff = Backoff::new();
        let mut idle_polls = 0u32;
        while self.running.load(Ordering::Acquire) {
            let resource = match self.receiver.recv_timeout(RECV_TIMEOUT) {
                Ok(resource) => resource,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match self.poll_one(resource) {
                PollOutcome::Waiting => {
                    idle_polls += 1;
                    if idle_polls >= self.backoff_limit {
                        thread::sleep(PARK_DURATION);
                        idle_polls = 0;
                    } else {
                        backoff.snooze();
                    }
                }
                _ => {
                    idle_polls = 0;
                    backoff.reset();
                }
            }
        }
    }
}

/// Pass summary from [`LoadScheduler::poll_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Bodies that ran this pass
    pub progressed: usize,
    /// Loads that finished this pass, either way
    pub completed: usize,
    /// Loads still in flight afterwards
    pub pending: usize,
}

/// Polls in-flight loads on worker threads, or on demand in manual mode
pub struct LoadScheduler {
    shared: Arc<SchedulerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LoadScheduler {
    /// `worker_threads == 0` selects manual mode
    pub fn new(worker_threads: usize, backoff_limit: u32) -> Self {
        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(SchedulerShared {
            sender,
            receiver,
            running: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            backoff_limit: backoff_limit.max(1),
        });

        let mut workers = Vec::with_capacity(worker_threads);
        for index in 0..worker_threads {
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("resource-load-{index}"))
                .spawn(move || shared.worker_loop());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(error = %e, "failed to spawn load worker"),
            }
        }
        debug!(workers = workers.len(), "load scheduler started");

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Manual mode: nothing polls unless the owner calls `poll_all`
    pub fn is_manual(&self) -> bool {
        self.workers.lock().is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Loads scheduled and not yet finished
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Queue a freshly scheduled load
    pub fn submit(&self, resource: RC<dyn Resource>) {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let _ = self.shared.sender.send(resource);
        if !self.is_running() {
            // nobody will ever poll it; fail it now so waiters return
            self.drain();
        }
    }

    /// Poll every queued load once
    pub fn poll_all(&self) -> PollReport {
        let batch: Vec<RC<dyn Resource>> = self.shared.receiver.try_iter().collect();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<PollOutcome> = batch
            .into_par_iter()
            .map(|resource| self.shared.poll_one(resource))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<PollOutcome> = batch
            .into_iter()
            .map(|resource| self.shared.poll_one(resource))
            .collect();

        let mut report = PollReport::default();
        for outcome in outcomes {
            match outcome {
                PollOutcome::Progressed => report.progressed += 1,
                PollOutcome::Ready | PollOutcome::Failed => {
                    report.progressed += 1;
                    report.completed += 1;
                }
                PollOutcome::Waiting | PollOutcome::Idle => {}
            }
        }
        report.pending = self.in_flight();
        report
    }

    /// Poll until nothing is in flight, or until `backoff_limit` passes in
    /// a row make no progress. Returns the loads still in flight.
    pub fn run_until_idle(&self) -> usize {
        let backoff = Backoff::new();
        let mut idle_passes = 0u32;
        loop {
            let report = self.poll_all();
            if report.pending == 0 {
                return 0;
            }
            if report.progressed > 0 {
                idle_passes = 0;
                backoff.reset();
                continue;
            }
            idle_passes += 1;
            if idle_passes >= self.shared.backoff_limit {
                return report.pending;
            }
            backoff.snooze();
        }
    }

    /// Stop the workers and destroy every coroutine still in flight
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let current = thread::current().id();
        for worker in self.workers.lock().drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("load worker panicked");
            }
        }
        let destroyed = self.drain();
        debug!(destroyed, "load scheduler stopped");
    }

    fn drain(&self) -> usize {
        let mut destroyed = 0;
        for resource in self.shared.receiver.try_iter() {
            resource.abandon_load();
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            destroyed += 1;
        }
        destroyed
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LoadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadScheduler")
            .field("workers", &self.workers.lock().len())
            .field("in_flight", &self.in_flight())
            .field("running", &self.is_running())
            .finish()
    }
}
