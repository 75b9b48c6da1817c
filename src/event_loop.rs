//! Collaborator contract for C7: a cooperative task loop plus a bounded
//! thread pool for blocking work, usable from any thread.
//!
//! Grounded on `eventloop.py`'s `run_coro`/`run_in_executor`: the original
//! lazily grabs (or creates) the current thread's asyncio event loop and
//! drives it to completion, or hands a coroutine to a thread-pool executor
//! to run on a fresh loop. `RequestExecutor` in the Python original owns one
//! `eventloop.Runner` instance per process and schedules both request
//! bookkeeping coroutines (`run_task`) and blocking sends/polls
//! (`run_in_executor`) on it. The Rust recast keeps that one-runner-per-
//! owner shape but swaps the lazily-discovered loop for an explicitly owned
//! `tokio::runtime::Runtime`, parked on its own thread so `start`/`stop`
//! are callable from anywhere (spec §4.7: "assumes these operations are
//! thread-safe from arbitrary caller threads").

use std::thread::{self, JoinHandle};

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle as TaskHandle;

use crate::error::ExchangeFault;

/// Owns a tokio runtime on a dedicated thread and exposes the scheduling
/// primitives C7 promises: `run_task` for cooperative coroutines,
/// `run_in_executor` for blocking work.
pub struct EventLoopRunner {
    handle: Handle,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoopRunner {
    /// Spawn the runtime's owning thread and block until it is ready to
    /// accept tasks — matches `Runner.start(wait=True)`, whose `wait`
    /// parameter gates on the loop thread actually starting.
    pub fn start() -> Result<Self, ExchangeFault> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Handle>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let thread = thread::Builder::new()
            .name("event-loop-runner".to_string())
            .spawn(move || {
                let runtime = match Runtime::new() {
                    Ok(rt) => rt,
                    Err(_) => return,
                };
                let _ = ready_tx.send(runtime.handle().clone());
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(ExchangeFault::Io)?;

        let handle = ready_rx
            .recv()
            .map_err(|_| ExchangeFault::Io(std::io::Error::other("event loop runner failed to start")))?;

        Ok(EventLoopRunner {
            handle,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// The runtime handle backing this runner — the `loop` accessor from
    /// spec §4.7.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Schedule a cooperative task on the runner's loop. Matches
    /// `Runner.run_task`.
    pub fn run_task<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Schedule blocking work on the runtime's thread pool. Matches
    /// `Runner.run_in_executor(None, proc, *args)` — the original always
    /// passes `executor=None` to use its default pool, so we expose only
    /// that case rather than a configurable-pool parameter.
    pub fn run_in_executor<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }

    /// Stop the runner's loop. `wait` matches `Runner.stop(wait)`: when
    /// true, block until the owning thread has actually exited.
    pub fn stop(&mut self, wait: bool) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if wait {
            self.join();
        }
    }

    /// Block until the runner's thread exits. Matches `Runner.join`.
    pub fn join(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for EventLoopRunner {
    fn drop(&mut self) {
        self.stop(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn run_task_executes_on_the_owned_runtime() {
        let runner = EventLoopRunner::start().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_task = Arc::clone(&ran);
        let handle = runner.run_task(async move {
            ran_task.store(true, Ordering::SeqCst);
        });
        runner.handle().block_on(handle).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn run_in_executor_runs_blocking_work() {
        let runner = EventLoopRunner::start().unwrap();
        let handle = runner.run_in_executor(|| 2 + 2);
        let result = runner.handle().block_on(handle).unwrap();
        assert_eq!(result, 4);
    }

    #[test]
    fn stop_then_join_returns_cleanly() {
        let mut runner = EventLoopRunner::start().unwrap();
        runner.stop(true);
    }
}
