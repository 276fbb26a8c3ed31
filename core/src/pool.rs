//! Fixed-size worker pool with per-worker state.
//!
//! Work items and results travel over bounded channels; workers never share
//! mutable state with the producer or with each other. Each worker builds its
//! own state with the initializer before it receives its first item.

use crate::error::{PipelineError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One-shot cancellation signal. Cloning shares the same signal.
///
/// Besides the flag, [`CancelToken::signal`] can be used in a channel select:
/// it becomes ready (disconnected) once the token is cancelled.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self { Self::new() }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self { flag: Arc::new(AtomicBool::new(false)), trigger: Arc::new(Mutex::new(Some(tx))), signal: rx }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool { self.flag.load(Ordering::SeqCst) }

    pub fn signal(&self) -> &Receiver<()> { &self.signal }
}

pub struct WorkerPool<I, O> {
    work_tx: Option<Sender<I>>,
    results: Option<Receiver<O>>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancelToken,
    ready: Arc<AtomicUsize>,
    size: usize,
}

impl<I: Send + 'static, O: Send + 'static> WorkerPool<I, O> {
    /// Start `size` workers. `init` runs once inside each worker thread; a
    /// worker whose initializer fails logs the error and exits without ever
    /// taking work. A panicking task drops its item and the worker carries on.
    pub fn spawn<S, Init, F>(name: &str, size: usize, queue_depth: usize, init: Init, task: F) -> Result<Self>
    where
        S: 'static,
        Init: Fn(usize, &CancelToken) -> Result<S> + Send + Sync + 'static,
        F: Fn(&S, I) -> O + Send + Sync + 'static,
    {
        let (work_tx, work_rx) = bounded::<I>(queue_depth);
        let (result_tx, result_rx) = bounded::<O>(queue_depth);
        let init = Arc::new(init);
        let task = Arc::new(task);
        let cancel = CancelToken::new();
        let ready = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(size);
        for worker in 0..size {
            let init = init.clone();
            let task = task.clone();
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let ready = ready.clone();

            let handle = thread::Builder::new().name(format!("{name}-{worker}")).spawn(move || {
                let state = match init(worker, &cancel) {
                    Ok(state) => state,
                    Err(e) => {
                        let err = PipelineError::WorkerInit { worker, reason: e.to_string() };
                        tracing::error!(error = %err, "worker not ready");
                        return;
                    }
                };
                ready.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(worker, "worker ready");

                while let Ok(item) = work_rx.recv() {
                    if cancel.is_cancelled() { break; }
                    let out = match catch_unwind(AssertUnwindSafe(|| task(&state, item))) {
                        Ok(out) => out,
                        Err(_) => {
                            tracing::error!(worker, "task panicked, item dropped");
                            continue;
                        }
                    };
                    if cancel.is_cancelled() || result_tx.send(out).is_err() { break; }
                }
            })?;
            handles.push(handle);
        }

        Ok(Self { work_tx: Some(work_tx), results: Some(result_rx), handles, cancel, ready, size })
    }
}

impl<I, O> WorkerPool<I, O> {
    /// `None` once the pool is closed or terminated.
    pub fn sender(&self) -> Option<&Sender<I>> { self.work_tx.as_ref() }

    /// Disconnects once every worker has exited; `None` after termination.
    pub fn results(&self) -> Option<&Receiver<O>> { self.results.as_ref() }

    pub fn size(&self) -> usize { self.size }

    /// Workers whose initializer succeeded so far.
    pub fn ready_workers(&self) -> usize { self.ready.load(Ordering::SeqCst) }

    /// Stop accepting work. Queued and in-flight items still complete.
    pub fn close(&mut self) {
        self.work_tx.take();
    }

    /// Stop accepting work and abandon everything queued or in flight.
    pub fn terminate(&mut self) {
        self.cancel.cancel();
        self.work_tx.take();
        self.results.take();
    }

    /// Wait for every worker thread to exit. Calling it again is a no-op.
    pub fn join(&mut self) -> Result<()> {
        let mut panicked = 0usize;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() { panicked += 1; }
        }
        if panicked > 0 {
            return Err(PipelineError::Critical(format!("{panicked} worker thread(s) panicked")));
        }
        Ok(())
    }
}

impl<I, O> Drop for WorkerPool<I, O> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.terminate();
            let _ = self.join();
        }
    }
}
