//! Worker Dispatch
//!
//! Runs an engine's drive loop on a dedicated thread. One worker per
//! stream in asynchronous mode; it lives until the stream reaches a
//! terminal status or the engine shuts down.

use std::sync::Arc;
use std::thread;

use parking_lot::MutexGuard;
use tracing::{debug, warn};

use crate::engine::{drive, Inner, Shared};
use crate::lifecycle::WorkerExitGuard;
use crate::message::DriveMode;

/// Start a worker for `shared`. Must be called with the engine lock held
/// and the stream already claimed for driving.
///
/// Returns false if the OS refused the thread; the caller then drives
/// inline instead.
pub(crate) fn spawn(shared: &Arc<Shared>, guard: &mut MutexGuard<'_, Inner>) -> bool {
    debug_assert!(!guard.lifecycle.worker_running());
    let worker_shared = Arc::clone(shared);
    let name = format!("{}-{}", shared.config.worker_name, shared.id);

    match thread::Builder::new()
        .name(name)
        .spawn(move || worker_main(worker_shared))
    {
        Ok(handle) => {
            guard.lifecycle.worker_started();
            // A previous worker has retired; dropping its handle detaches it
            guard.worker = Some(handle);
            debug!(stream = shared.id, "Spawned worker");
            true
        }
        Err(e) => {
            warn!(
                "Failed to spawn worker for stream {}: {} - driving inline",
                shared.id, e
            );
            false
        }
    }
}

fn worker_main(shared: Arc<Shared>) {
    let mut exit_guard = WorkerExitGuard::new(&shared);
    debug!(stream = shared.id, "Worker started");

    {
        let mut guard = shared.inner.lock();
        drive(&shared, &mut guard, DriveMode::Async);
    }

    exit_guard.disarm();
    debug!(stream = shared.id, "Worker exiting");
}
