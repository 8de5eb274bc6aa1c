//! Lifecycle Guard
//!
//! Destruction may race with a worker in the middle of a backend step
//! and with a handler in the middle of a delivery. Teardown marks the
//! engine as shutting down, wakes a waiting worker, then blocks until
//! neither is running before releasing anything.

use std::thread::{self, ThreadId};

use parking_lot::MutexGuard;
use tracing::{debug, error, warn};

use crate::engine::{Inner, Shared};

/// Guarded by the engine mutex
#[derive(Debug, Default)]
pub(crate) struct LifecycleFlags {
    worker_running: bool,
    /// Thread currently inside a handler call, if any
    callback_thread: Option<ThreadId>,
    shutting_down: bool,
}

impl LifecycleFlags {
    pub(crate) fn worker_started(&mut self) {
        self.worker_running = true;
    }

    pub(crate) fn worker_running(&self) -> bool {
        self.worker_running
    }

    pub(crate) fn enter_callback(&mut self) {
        self.callback_thread = Some(thread::current().id());
    }

    pub(crate) fn exit_callback(&mut self) {
        self.callback_thread = None;
    }

    pub(crate) fn callback_running(&self) -> bool {
        self.callback_thread.is_some()
    }

    pub(crate) fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Nothing else runs on the engine's behalf. A handler running on
    /// `current` is the caller itself and does not count.
    fn is_quiescent_for(&self, current: ThreadId) -> bool {
        !self.worker_running && self.callback_thread.map_or(true, |t| t == current)
    }
}

/// Mark the async worker as gone and wake a waiting destructor
pub(crate) fn retire_worker(shared: &Shared, guard: &mut MutexGuard<'_, Inner>) {
    guard.lifecycle.worker_running = false;
    shared.lifespan.notify_all();
}

/// Retires the worker if its thread unwinds out of the drive loop
pub(crate) struct WorkerExitGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl<'a> WorkerExitGuard<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WorkerExitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!(stream = self.shared.id, "Worker exited abnormally");
        let mut guard = self.shared.inner.lock();
        guard.state.pause();
        guard.mode = None;
        retire_worker(self.shared, &mut guard);
    }
}

/// Stop the engine and release its resources
///
/// Safe to call from inside a handler: the handler's own thread is not
/// waited for.
pub(crate) fn shutdown(shared: &Shared) {
    let current = thread::current().id();

    let worker = {
        let mut guard = shared.inner.lock();
        guard.lifecycle.begin_shutdown();
        shared.input_ready.notify_all();

        if !guard.lifecycle.is_quiescent_for(current) {
            debug!(stream = shared.id, "Waiting for worker and handler to finish");
            shared
                .lifespan
                .wait_while(&mut guard, |inner| !inner.lifecycle.is_quiescent_for(current));
        }
        guard.worker.take()
    };

    // Retired already; joining only waits for the thread to unwind its stack
    if let Some(handle) = worker {
        if handle.thread().id() != current && handle.join().is_err() {
            warn!(stream = shared.id, "Worker thread panicked");
        }
    }

    let (chunks, handler) = shared.inner.lock().release();
    let backend = shared.backend.lock().take();
    drop(handler);
    drop(backend);

    debug!(stream = shared.id, discarded_chunks = chunks, "Engine released");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiescence_ignores_own_callback() {
        let mut flags = LifecycleFlags::default();
        let me = thread::current().id();
        assert!(flags.is_quiescent_for(me));

        flags.enter_callback();
        assert!(flags.callback_running());
        assert!(flags.is_quiescent_for(me));

        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        assert!(!flags.is_quiescent_for(other));

        flags.exit_callback();
        flags.worker_started();
        assert!(!flags.is_quiescent_for(me));
    }

    #[test]
    fn test_shutdown_flag_is_sticky() {
        let mut flags = LifecycleFlags::default();
        assert!(!flags.is_shutting_down());
        flags.begin_shutdown();
        flags.begin_shutdown();
        assert!(flags.is_shutting_down());
    }
}
