//! Single-worker scheduler for repository operations.
//!
//! Every unit of work runs on one dedicated thread, strictly in submission order. The worker is
//! created lazily and recreated transparently after [`OperationScheduler::shutdown`], so a
//! submission never fails because of an earlier teardown.

use crate::error::{OperationError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How a scheduled unit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Completed,
    /// The body returned an error or panicked; the error callback received it
    Failed,
    /// Cancelled before it started; the body never ran
    Cancelled,
    /// A result or error callback panicked with this message
    CallbackPanicked(String),
}

#[derive(Debug)]
enum HandleState {
    Pending,
    Running,
    Done(Completion),
}

#[derive(Debug)]
struct HandleShared {
    state: Mutex<HandleState>,
    changed: Condvar,
}

impl HandleShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(HandleState::Pending),
            changed: Condvar::new(),
        }
    }

    /// Moves Pending to Running. Returns false when the unit was cancelled meanwhile.
    fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            HandleState::Pending => {
                *state = HandleState::Running;
                true
            }
            _ => false,
        }
    }

    fn finish(&self, completion: Completion) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // a cancelled unit keeps its Cancelled completion
        if !matches!(*state, HandleState::Done(Completion::Cancelled)) {
            *state = HandleState::Done(completion);
        }
        self.changed.notify_all();
    }
}

/// Handle to one scheduled unit of work.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    shared: Arc<HandleShared>,
}

impl OperationHandle {
    /// Cancels the unit if it has not started yet. A running unit is never interrupted.
    pub fn cancel(&self) -> bool {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *state {
            HandleState::Pending => {
                *state = HandleState::Done(Completion::Cancelled);
                self.shared.changed.notify_all();
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.completion(), Some(Completion::Cancelled))
    }

    pub fn is_done(&self) -> bool {
        self.completion().is_some()
    }

    pub fn completion(&self) -> Option<Completion> {
        match &*self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            HandleState::Done(completion) => Some(completion.clone()),
            _ => None,
        }
    }

    /// Blocks until the unit and its callback have finished, or the unit was cancelled.
    pub fn wait(&self) -> Completion {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let HandleState::Done(completion) = &*state {
                return completion.clone();
            }
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |s| !matches!(s, HandleState::Done(_)))
            .unwrap_or_else(PoisonError::into_inner);
        match &*state {
            HandleState::Done(completion) => Some(completion.clone()),
            _ => None,
        }
    }
}

struct Worker {
    jobs: Sender<Job>,
    stopped: Receiver<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Starts a worker. When `predecessor` is given, no job runs before that worker has stopped.
    fn spawn(generation: usize, predecessor: Option<Receiver<()>>) -> std::io::Result<Self> {
        let (jobs, queue) = crossbeam_channel::unbounded::<Job>();
        let (stopped_tx, stopped) = crossbeam_channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(format!("gitweave-worker-{}", generation))
            .spawn(move || {
                if let Some(predecessor) = predecessor {
                    // a dropped sender means the old thread is gone as well
                    let _ = predecessor.recv();
                    debug!("Previous scheduler worker finished, worker #{} starts", generation);
                }
                for job in queue {
                    job();
                }
                let _ = stopped_tx.send(());
            })?;

        debug!("Started scheduler worker #{}", generation);
        Ok(Self {
            jobs,
            stopped,
            thread,
        })
    }
}

/// Runs submitted units one at a time on a single worker thread.
pub struct OperationScheduler {
    worker: Mutex<Option<Worker>>,
    /// Stop signal of a worker that outlived its shutdown timeout
    lingering: Mutex<Option<Receiver<()>>>,
    generation: Mutex<usize>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for OperationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationScheduler")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for OperationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationScheduler {
    pub fn new() -> Self {
        Self::with_shutdown_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_shutdown_timeout(shutdown_timeout: Duration) -> Self {
        Self {
            worker: Mutex::new(None),
            lingering: Mutex::new(None),
            generation: Mutex::new(0),
            shutdown_timeout,
        }
    }

    /// Schedules work whose errors only need to be logged.
    pub fn schedule<W>(&self, work: W) -> OperationHandle
    where
        W: FnOnce() -> Result<()> + Send + 'static,
    {
        self.schedule_with(work, |()| {}, |err| error!("Scheduled operation failed: {}", err))
    }

    pub fn schedule_with_error<W, E>(&self, work: W, on_error: E) -> OperationHandle
    where
        W: FnOnce() -> Result<()> + Send + 'static,
        E: FnOnce(OperationError) + Send + 'static,
    {
        self.schedule_with(work, |()| {}, on_error)
    }

    /// Schedules `work`; exactly one of `on_result` / `on_error` runs on the worker afterwards.
    pub fn schedule_with<T, W, R, E>(&self, work: W, on_result: R, on_error: E) -> OperationHandle
    where
        T: Send + 'static,
        W: FnOnce() -> Result<T> + Send + 'static,
        R: FnOnce(T) + Send + 'static,
        E: FnOnce(OperationError) + Send + 'static,
    {
        let shared = Arc::new(HandleShared::new());
        let handle = OperationHandle {
            shared: Arc::clone(&shared),
        };

        let job: Job = Box::new(move || {
            let ran = shared.start();
            let callbacks = panic::catch_unwind(AssertUnwindSafe(move || {
                if !ran {
                    on_error(OperationError::Cancelled);
                    return Completion::Cancelled;
                }
                match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(Ok(value)) => {
                        on_result(value);
                        Completion::Completed
                    }
                    Ok(Err(err)) => {
                        on_error(err);
                        Completion::Failed
                    }
                    Err(payload) => {
                        let err = OperationError::from_panic(payload.as_ref());
                        error!("Scheduled operation panicked: {}", err);
                        on_error(err);
                        Completion::Failed
                    }
                }
            }));
            let completion = match callbacks {
                Ok(completion) => completion,
                Err(payload) => {
                    let message = OperationError::from_panic(payload.as_ref()).to_string();
                    error!("Operation callback panicked: {}", message);
                    Completion::CallbackPanicked(message)
                }
            };
            shared.finish(completion);
        });

        self.submit(job);
        handle
    }

    /// Stops accepting work on the current worker and waits for queued units to drain.
    ///
    /// A later submission starts a fresh worker.
    pub fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Worker {
            jobs,
            stopped,
            thread,
        }) = worker
        else {
            return;
        };

        drop(jobs);
        match stopped.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    warn!("Scheduler worker terminated abnormally");
                }
                debug!("Scheduler worker stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Scheduler worker did not stop within {:?}; leaving it to finish in the background",
                    self.shutdown_timeout
                );
                *self
                    .lingering
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(stopped);
            }
        }
    }

    fn submit(&self, job: Job) {
        let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let mut job = job;
        // at most one retry: a send only fails when the worker thread is gone
        for _ in 0..2 {
            if guard.is_none() {
                match self.spawn_worker() {
                    Ok(worker) => *guard = Some(worker),
                    Err(err) => {
                        error!("Failed to start scheduler worker: {}", err);
                        break;
                    }
                }
            }
            let Some(worker) = guard.as_ref() else {
                break;
            };
            match worker.jobs.send(job) {
                Ok(()) => return,
                Err(returned) => {
                    warn!("Scheduler worker is gone, recreating it");
                    job = returned.into_inner();
                    *guard = None;
                }
            }
        }
        // no thread could be started; run inline so callbacks still fire
        job();
    }

    fn spawn_worker(&self) -> std::io::Result<Worker> {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        let predecessor = self
            .lingering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Worker::spawn(*generation, predecessor)
    }
}

impl Drop for OperationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_units_run_in_submission_order_without_overlap() {
        let scheduler = OperationScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let order = Arc::clone(&order);
                let running = Arc::clone(&running);
                let overlapped = Arc::clone(&overlapped);
                scheduler.schedule(move || {
                    if running.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    order.lock().unwrap().push(i);
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in &handles {
            assert_eq!(handle.wait_timeout(WAIT), Some(Completion::Completed));
        }
        assert!(!overlapped.load(Ordering::SeqCst));
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_result_callback_receives_value() {
        let scheduler = OperationScheduler::new();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let handle = scheduler.schedule_with(
            || Ok(41 + 1),
            move |value| tx.send(value).unwrap(),
            |err| panic!("unexpected error: {err}"),
        );

        assert_eq!(handle.wait_timeout(WAIT), Some(Completion::Completed));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 42);
    }

    #[test]
    fn test_error_callback_receives_original_error() {
        let scheduler = OperationScheduler::new();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let handle = scheduler.schedule_with_error(
            || Err(OperationError::invalid_state("detached HEAD")),
            move |err| tx.send(err.to_string()).unwrap(),
        );

        assert_eq!(handle.wait_timeout(WAIT), Some(Completion::Failed));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            "Invalid repository state: detached HEAD"
        );
    }

    #[test]
    fn test_panicking_body_reaches_error_callback() {
        let scheduler = OperationScheduler::new();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let handle = scheduler.schedule_with_error(
            || panic!("engine exploded"),
            move |err| tx.send(err).unwrap(),
        );

        assert_eq!(handle.wait_timeout(WAIT), Some(Completion::Failed));
        match rx.recv_timeout(WAIT).unwrap() {
            OperationError::Panicked { message } => assert_eq!(message, "engine exploded"),
            other => panic!("unexpected error: {other}"),
        }

        // the worker survives and keeps serving
        let next = scheduler.schedule(|| Ok(()));
        assert_eq!(next.wait_timeout(WAIT), Some(Completion::Completed));
    }

    #[test]
    fn test_cancel_before_start_reports_cancellation() {
        let scheduler = OperationScheduler::new();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let ran = Arc::new(AtomicBool::new(false));
        let (err_tx, err_rx) = crossbeam_channel::bounded(1);

        let blocker = scheduler.schedule(move || {
            let _ = gate_rx.recv_timeout(WAIT);
            Ok(())
        });
        let victim = {
            let ran = Arc::clone(&ran);
            scheduler.schedule_with_error(
                move || {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                },
                move |err| err_tx.send(err).unwrap(),
            )
        };

        assert!(victim.cancel());
        assert!(victim.is_cancelled());
        gate_tx.send(()).unwrap();

        assert_eq!(blocker.wait_timeout(WAIT), Some(Completion::Completed));
        assert!(matches!(
            err_rx.recv_timeout(WAIT).unwrap(),
            OperationError::Cancelled
        ));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!victim.cancel());
    }

    #[test]
    fn test_running_unit_cannot_be_cancelled() {
        let scheduler = OperationScheduler::new();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = scheduler.schedule(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv_timeout(WAIT);
            Ok(())
        });

        started_rx.recv_timeout(WAIT).unwrap();
        assert!(!handle.cancel());
        gate_tx.send(()).unwrap();
        assert_eq!(handle.wait_timeout(WAIT), Some(Completion::Completed));
    }

    #[test]
    fn test_worker_recreated_after_shutdown() {
        let scheduler = OperationScheduler::new();
        let first = scheduler.schedule(|| Ok(()));
        assert_eq!(first.wait_timeout(WAIT), Some(Completion::Completed));

        scheduler.shutdown();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let second = scheduler.schedule_with(
            || Ok(thread::current().name().map(str::to_string)),
            move |name| tx.send(name).unwrap(),
            |err| panic!("unexpected error: {err}"),
        );
        assert_eq!(second.wait_timeout(WAIT), Some(Completion::Completed));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap().as_deref(),
            Some("gitweave-worker-2")
        );
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let scheduler = OperationScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            scheduler.schedule(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        scheduler.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_shutdown_timeout_does_not_block_forever() {
        let scheduler = OperationScheduler::with_shutdown_timeout(Duration::from_millis(50));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        scheduler.schedule(move || {
            let _ = gate_rx.recv_timeout(WAIT);
            Ok(())
        });

        let started = std::time::Instant::now();
        scheduler.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(gate_tx);
    }

    #[test]
    fn test_worker_started_after_timed_out_shutdown_waits_for_the_old_one() {
        let scheduler = OperationScheduler::with_shutdown_timeout(Duration::from_millis(50));
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));

        let unit = |millis: u64| {
            let running = Arc::clone(&running);
            let overlapped = Arc::clone(&overlapped);
            move || {
                if running.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlapped.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(millis));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let slow = scheduler.schedule(unit(500));
        scheduler.shutdown();
        assert!(!slow.is_done());

        let next = scheduler.schedule(unit(10));
        assert_eq!(next.wait_timeout(WAIT), Some(Completion::Completed));
        assert_eq!(slow.completion(), Some(Completion::Completed));
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callback_panic_is_visible_on_handle() {
        let scheduler = OperationScheduler::new();
        let handle = scheduler.schedule_with(|| Ok(()), |()| panic!("ui bug"), |_| {});

        assert_eq!(
            handle.wait_timeout(WAIT),
            Some(Completion::CallbackPanicked("Operation panicked: ui bug".to_string()))
        );
        let next = scheduler.schedule(|| Ok(()));
        assert_eq!(next.wait_timeout(WAIT), Some(Completion::Completed));
    }
}
