//! Compile queue: a fixed pool of worker threads draining one batch of
//! compile jobs at a time.
//!
//! The driver calls [`CompileQueue::schedule`] and then
//! [`CompileQueue::wait`]. Workers claim jobs from the end of the batch under
//! the queue lock and run them outside it. A job failure does not stop the
//! other workers, but once the batch drains `wait` reports only the first
//! captured error and delivers no results at all.

use super::{CompilationContext, CompileJob};
use crate::diagnostics::DiagnosticError;
use crate::diagnostics::crash;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Worker count used when none is configured
pub const DEFAULT_THREAD_COUNT: usize = 2;

#[derive(Default)]
struct QueueState {
    jobs: Option<Arc<Vec<CompileJob>>>,
    /// Jobs not yet claimed
    job_count: usize,
    total_jobs: usize,
    active_workers: usize,
    terminate: bool,
    errors: Vec<DiagnosticError>,
}

struct Shared {
    state: Mutex<QueueState>,
    jobs_available: Condvar,
    jobs_finished: Condvar,
}

pub struct CompileQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl CompileQueue {
    /// Start `thread_count` workers (at least one). They live until the
    /// queue is dropped.
    pub fn new(thread_count: usize) -> io::Result<Self> {
        let thread_count = thread_count.max(1);
        let mut queue = CompileQueue {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                jobs_available: Condvar::new(),
                jobs_finished: Condvar::new(),
            }),
            workers: Vec::with_capacity(thread_count),
        };
        for id in 0..thread_count {
            let shared = Arc::clone(&queue.shared);
            let handle = thread::Builder::new()
                .name(format!("arkc-compile-{id}"))
                .spawn(move || shared.worker(id))?;
            queue.workers.push(handle);
        }
        tracing::debug!(threads = thread_count, "compile queue started");
        Ok(queue)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Schedule one job per scope of `context`
    pub fn schedule(&self, context: &Arc<CompilationContext>) {
        self.schedule_jobs(CompileJob::batch(context));
    }

    /// Schedule a prepared batch and wake the workers.
    ///
    /// # Panics
    ///
    /// If the previous batch has not been collected with [`wait`](Self::wait).
    pub fn schedule_jobs(&self, jobs: Vec<CompileJob>) {
        let mut state = self.shared.state.lock();
        assert!(
            state.job_count == 0 && state.jobs.is_none(),
            "compile queue: schedule called while a batch is in flight"
        );
        let count = jobs.len();
        state.jobs = Some(Arc::new(jobs));
        state.job_count = count;
        state.total_jobs = count;
        drop(state);

        tracing::debug!(jobs = count, "scheduled compile batch");
        self.shared.jobs_available.notify_all();
    }

    /// Block until every job of the batch has run.
    ///
    /// On success `on_finished` receives each job in scheduling order. If
    /// any job failed, the first captured error is returned instead and no
    /// job is delivered.
    pub fn wait<F>(&self, mut on_finished: F) -> Result<(), DiagnosticError>
    where
        F: FnMut(CompileJob),
    {
        let (jobs, total, errors) = {
            let mut state = self.shared.state.lock();
            self.shared
                .jobs_finished
                .wait_while(&mut state, |s| s.active_workers > 0 || s.job_count > 0);
            let total = std::mem::take(&mut state.total_jobs);
            (state.jobs.take(), total, std::mem::take(&mut state.errors))
        };

        if let Some(first) = errors.into_iter().next() {
            tracing::debug!(jobs = total, "compile batch failed: {}", first.message());
            return Err(first);
        }

        let Some(jobs) = jobs else {
            return Ok(());
        };
        let jobs = Arc::try_unwrap(jobs).map_err(|_| {
            DiagnosticError::fatal("compile queue: jobs still referenced after the batch drained")
        })?;
        tracing::debug!(jobs = total, "compile batch finished");
        jobs.into_iter().for_each(&mut on_finished);
        Ok(())
    }
}

impl Drop for CompileQueue {
    fn drop(&mut self) {
        self.shared.state.lock().terminate = true;
        self.shared.jobs_available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("compile worker exited with a panic");
            }
        }
    }
}

impl Shared {
    fn worker(&self, id: usize) {
        let _span = tracing::debug_span!("worker", id).entered();
        let _signal_stack = crash::alternate_signal_stack();
        loop {
            {
                let mut state = self.state.lock();
                self.jobs_available
                    .wait_while(&mut state, |s| !s.terminate && s.job_count == 0);
                if state.terminate {
                    tracing::trace!("worker terminating");
                    return;
                }
            }
            self.consume();
            self.jobs_finished.notify_all();
        }
    }

    /// Claim and run jobs until none are left unclaimed
    fn consume(&self) {
        let mut state = self.state.lock();
        state.active_workers += 1;
        while state.job_count > 0 {
            state.job_count -= 1;
            let index = state.job_count;
            let Some(jobs) = state.jobs.clone() else {
                break;
            };
            let outcome = MutexGuard::unlocked(&mut state, move || run_job(jobs, index));
            if let Err(error) = outcome {
                state.errors.push(error);
            }
        }
        state.active_workers -= 1;
    }
}

/// Run one job outside the queue lock. Panics become fatal diagnostics so
/// the worker survives. `jobs` is dropped before returning.
fn run_job(jobs: Arc<Vec<CompileJob>>, index: usize) -> Result<(), DiagnosticError> {
    let job = &jobs[index];
    if !job.is_ready() {
        tracing::trace!(
            job = index,
            pending = job.pending_dependencies(),
            "dispatching job with unsignalled dependencies"
        );
    }
    let result = panic::catch_unwind(AssertUnwindSafe(|| job.run())).unwrap_or_else(|payload| {
        Err(DiagnosticError::fatal(format!(
            "compile job for `{}` panicked: {}",
            job.scope().name,
            panic_message(payload.as_ref())
        )))
    });
    if result.is_ok() {
        job.signal(&jobs);
    }
    tracing::trace!(job = index, ok = result.is_ok(), "job finished");
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
