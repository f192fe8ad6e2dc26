//! Parallel work session with progress polling and scoped teardown
//!
//! A `ParallelWorkManager` owns the worker pool, the outstanding unit
//! handles, and a poller thread that samples the shared progress counter to
//! drive the visual display. Dropping the manager cancels whatever is still
//! outstanding; `finish` waits for it instead. Both paths end in the same
//! teardown, which never blocks on slow worker exits.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use indicatif::ProgressBar;

use crate::error::WriteError;
use crate::progress::{progress_display, read_progress, set_progress, ProgressConfig};

/// One worker per available core.
pub fn default_worker_count() -> usize {
    num_cpus::get()
}

type UnitResult<R> = Result<R, WriteError>;
type Completion<R> = (u64, UnitResult<R>);

/// Handle to a submitted work unit.
///
/// Cancellation is cooperative and best-effort: a unit that has already
/// started keeps running; a cancelled unit that has not started completes as
/// `WriteError::Cancelled` without running.
#[derive(Debug, Clone)]
pub struct WorkHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl WorkHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session-local identifier of the unit.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prevent the unit from starting if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

struct Job<R> {
    id: u64,
    cancelled: Arc<AtomicBool>,
    work: Box<dyn FnOnce() -> UnitResult<R> + Send>,
}

enum Executor<R> {
    /// Runs each unit synchronously at submit time.
    Immediate,
    /// OS worker threads draining a shared job queue.
    Pool {
        jobs_tx: Option<Sender<Job<R>>>,
        _workers: Vec<thread::JoinHandle<()>>,
    },
}

fn worker_loop<R>(jobs_rx: Receiver<Job<R>>, results_tx: Sender<Completion<R>>) {
    for job in jobs_rx.iter() {
        if job.cancelled.load(Ordering::Relaxed) {
            if results_tx.send((job.id, Err(WriteError::Cancelled))).is_err() {
                break;
            }
            continue;
        }
        // A panicking unit is indistinguishable from a worker that died; it
        // is classified apart from ordinary unit failures.
        let outcome = catch_unwind(AssertUnwindSafe(job.work))
            .unwrap_or_else(|_| Err(WriteError::WorkerDied));
        if results_tx.send((job.id, outcome)).is_err() {
            break;
        }
    }
}

/// Scoped session coordinating parallel work units and progress reporting.
pub struct ParallelWorkManager<R> {
    executor: Executor<R>,
    results_tx: Sender<Completion<R>>,
    results_rx: Receiver<Completion<R>>,
    outstanding: HashMap<u64, WorkHandle>,
    next_unit: u64,
    bar: ProgressBar,
    poller: Option<thread::JoinHandle<()>>,
    poller_stop: Arc<AtomicBool>,
    torn_down: bool,
}

impl<R: Send + 'static> ParallelWorkManager<R> {
    /// Open a session with `worker_count` pool threads.
    ///
    /// `worker_count == 0` selects the immediate same-thread executor, which
    /// makes tests deterministic and small inputs cheap. Opening a session
    /// resets the shared progress counter; at most one session may run per
    /// process at a time.
    pub fn new(worker_count: usize, config: ProgressConfig) -> Result<Self, WriteError> {
        let (results_tx, results_rx) = unbounded();

        let executor = if worker_count == 0 {
            Executor::Immediate
        } else {
            let (jobs_tx, jobs_rx) = unbounded::<Job<R>>();
            let mut workers = Vec::with_capacity(worker_count);
            for index in 0..worker_count {
                let jobs_rx = jobs_rx.clone();
                let results_tx = results_tx.clone();
                let worker = thread::Builder::new()
                    .name(format!("chunk-worker-{index}"))
                    .spawn(move || worker_loop(jobs_rx, results_tx))?;
                workers.push(worker);
            }
            Executor::Pool {
                jobs_tx: Some(jobs_tx),
                _workers: workers,
            }
        };

        set_progress(0);
        let bar = progress_display(&config);
        let poller_stop = Arc::new(AtomicBool::new(false));
        let poller = {
            let bar = bar.clone();
            let stop = Arc::clone(&poller_stop);
            let interval = config.poll_interval;
            thread::Builder::new()
                .name("progress-poll".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        bar.set_position(read_progress());
                        thread::sleep(interval);
                    }
                    log::debug!("exit progress thread");
                })?
        };

        Ok(Self {
            executor,
            results_tx,
            results_rx,
            outstanding: HashMap::new(),
            next_unit: 0,
            bar,
            poller: Some(poller),
            poller_stop,
            torn_down: false,
        })
    }

    /// Dispatch a work unit and track its handle as outstanding.
    pub fn submit<F>(&mut self, work: F) -> WorkHandle
    where
        F: FnOnce() -> Result<R, WriteError> + Send + 'static,
    {
        let id = self.next_unit;
        self.next_unit += 1;
        let handle = WorkHandle::new(id);
        self.outstanding.insert(id, handle.clone());

        match &self.executor {
            Executor::Immediate => {
                let outcome = work();
                let _ = self.results_tx.send((id, outcome));
            }
            Executor::Pool { jobs_tx, .. } => {
                let job = Job {
                    id,
                    cancelled: Arc::clone(&handle.cancelled),
                    work: Box::new(work),
                };
                let sent = jobs_tx.as_ref().map(|tx| tx.send(job).is_ok()).unwrap_or(false);
                if !sent {
                    let _ = self.results_tx.send((id, Err(WriteError::WorkerDied)));
                }
            }
        }
        handle
    }

    /// Number of submitted units that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Block until at least one outstanding unit completes or `timeout`
    /// elapses, then drain everything that completed in the meantime.
    ///
    /// The first failure cancels all remaining outstanding units and is
    /// returned. A pure timeout returns an empty vec and loses nothing;
    /// callers may wait again.
    pub fn wait_for_completed(&mut self, timeout: Option<Duration>) -> Result<Vec<R>, WriteError> {
        if self.outstanding.is_empty() {
            return Ok(Vec::new());
        }
        let first = match timeout {
            Some(timeout) => match self.results_rx.recv_timeout(timeout) {
                Ok(completion) => completion,
                Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
                Err(RecvTimeoutError::Disconnected) => return Err(WriteError::WorkerDied),
            },
            None => match self.results_rx.recv() {
                Ok(completion) => completion,
                Err(_) => return Err(WriteError::WorkerDied),
            },
        };

        let mut completions = vec![first];
        while let Ok(completion) = self.results_rx.try_recv() {
            completions.push(completion);
        }

        let mut results = Vec::new();
        for (id, outcome) in completions {
            self.outstanding.remove(&id);
            match outcome {
                Ok(result) => results.push(result),
                Err(WriteError::Cancelled) => {}
                Err(err) => {
                    self.cancel_outstanding();
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    /// Lazily yield unit results in completion order, not submission order.
    ///
    /// The first failed unit is yielded as an error, all remaining
    /// outstanding units are cancelled, and the iterator ends.
    pub fn results_as_completed(&mut self) -> impl Iterator<Item = Result<R, WriteError>> + '_ {
        let mut failed = false;
        std::iter::from_fn(move || {
            if failed {
                return None;
            }
            loop {
                if self.outstanding.is_empty() {
                    return None;
                }
                let (id, outcome) = match self.results_rx.recv() {
                    Ok(completion) => completion,
                    Err(_) => {
                        failed = true;
                        return Some(Err(WriteError::WorkerDied));
                    }
                };
                self.outstanding.remove(&id);
                match outcome {
                    Ok(result) => return Some(Ok(result)),
                    Err(WriteError::Cancelled) => continue,
                    Err(err) => {
                        failed = true;
                        self.cancel_outstanding();
                        return Some(Err(err));
                    }
                }
            }
        })
    }

    /// Wait for every outstanding unit and close the session.
    ///
    /// The first non-cancellation failure cancels the rest and is returned.
    /// Dropping the manager without calling this cancels everything
    /// outstanding instead of waiting.
    pub fn finish(mut self) -> Result<(), WriteError> {
        let result = self.wait_remaining();
        self.teardown();
        result
    }

    fn wait_remaining(&mut self) -> Result<(), WriteError> {
        while !self.outstanding.is_empty() {
            let (id, outcome) = match self.results_rx.recv() {
                Ok(completion) => completion,
                Err(_) => return Err(WriteError::WorkerDied),
            };
            self.outstanding.remove(&id);
            match outcome {
                Ok(_) | Err(WriteError::Cancelled) => {}
                Err(err) => {
                    self.cancel_outstanding();
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl<R> ParallelWorkManager<R> {
    fn cancel_outstanding(&self) {
        for handle in self.outstanding.values() {
            handle.cancel();
        }
    }

    // Runs exactly once from whichever exit path comes first.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.poller_stop.store(true, Ordering::Relaxed);
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
        self.bar.set_position(read_progress());
        self.bar.finish();
        // Closing the job queue lets workers drain and exit on their own;
        // they are never joined.
        if let Executor::Pool { jobs_tx, .. } = &mut self.executor {
            jobs_tx.take();
        }
    }
}

impl<R> Drop for ParallelWorkManager<R> {
    fn drop(&mut self) {
        self.cancel_outstanding();
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_is_positive() {
        assert!(default_worker_count() >= 1);
    }

    #[test]
    fn test_handle_cancellation_flag() {
        let handle = WorkHandle::new(0);
        assert_eq!(handle.id(), 0);
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        // Clones observe the same flag.
        let clone = handle.clone();
        assert!(clone.is_cancelled());
    }
}
