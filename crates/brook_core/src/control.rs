//! Stream Control
//!
//! The operation set a host application drives an engine through.

use brook_codec::{CodecBackend, DecoderOptions, EncoderOptions, ZstdDecoder, ZstdEncoder};
use tracing::debug;

use crate::bridge;
use crate::engine::{drive, StreamEngine};
use crate::error::{EngineError, EngineResult, UsageError};
use crate::message::{DriveMode, Input, NotificationHandler};
use crate::queue::{Chunk, ChunkQueue};
use crate::worker;

/// Host-facing operations on a codec stream
pub trait StreamControl {
    /// Queue input and drive the stream
    ///
    /// `Input::End` (or a zero-length chunk) ends the stream. In sync mode
    /// this returns once all queued input is consumed, with notifications
    /// already delivered. Backend failures are reported through the
    /// handler as a terminal status, never through the returned `Result`.
    fn submit(&self, input: Input, mode: DriveMode) -> EngineResult<()>;

    /// Install the notification handler, delivering anything queued while
    /// there was none
    fn set_handler(&self, handler: impl NotificationHandler + 'static);

    /// Backend memory footprint in bytes
    fn memusage(&self) -> Option<u64>;

    fn memlimit_get(&self) -> Option<u64>;

    fn memlimit_set(&self, limit: u64) -> EngineResult<()>;

    /// Input bytes consumed by the current stream
    fn total_in(&self) -> u64;

    /// Output bytes produced by the current stream
    fn total_out(&self) -> u64;

    /// Replace the backend with a zstd encoder
    fn init_encoder(&self, options: EncoderOptions) -> EngineResult<()>;

    /// Replace the backend with a zstd decoder
    fn init_decoder(&self, options: DecoderOptions) -> EngineResult<()>;
}

impl StreamControl for StreamEngine {
    fn submit(&self, input: Input, mode: DriveMode) -> EngineResult<()> {
        let shared = self.shared();
        let mut guard = shared.inner.lock();

        if guard.lifecycle.is_shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        if input.is_end() {
            if guard.finish_requested() || guard.awaiting_data {
                debug!(stream = shared.id, "Ignoring repeated end-of-input");
                return Ok(());
            }
            if guard.state.is_terminal() {
                // Stream ended on its own; this is its end marker, not a new stream
                guard.input.mark_end();
                return Ok(());
            }
        }
        if guard.state.is_terminal() {
            return Err(UsageError::TerminalPending.into());
        }
        if guard.finish_requested() {
            return Err(UsageError::InputAfterFinish.into());
        }

        match input {
            Input::Data(chunk) if !chunk.is_empty() => guard.input.push(chunk),
            _ => {
                guard.input.push(Chunk::empty());
                guard.input.mark_end();
            }
        }
        guard.awaiting_data = false;

        // Once a worker owns the stream every submission goes through it
        let mode = if guard.is_async() { DriveMode::Async } else { mode };

        match mode {
            DriveMode::Async => {
                guard.mode = Some(DriveMode::Async);
                if guard.state.begin() {
                    if !worker::spawn(shared, &mut guard) {
                        guard.mode = None;
                        drive(shared, &mut guard, DriveMode::Sync);
                    }
                } else {
                    shared.input_ready.notify_all();
                }
            }
            DriveMode::Sync => {
                // Otherwise a handler re-entered: the active driver picks it up
                if guard.state.begin() {
                    drive(shared, &mut guard, DriveMode::Sync);
                }
            }
        }
        Ok(())
    }

    fn set_handler(&self, handler: impl NotificationHandler + 'static) {
        let shared = self.shared();
        let mut guard = shared.inner.lock();
        let previous = guard.handler.replace(Box::new(handler));

        if guard.bridge.pending() > 0 {
            if guard.is_async() {
                guard.bridge.wake();
            } else {
                bridge::dispatch(shared, &mut guard);
            }
        }
        drop(guard);
        drop(previous);
    }

    fn memusage(&self) -> Option<u64> {
        self.shared()
            .backend
            .lock()
            .as_ref()
            .and_then(|backend| backend.memory_usage())
    }

    fn memlimit_get(&self) -> Option<u64> {
        self.shared()
            .backend
            .lock()
            .as_ref()
            .and_then(|backend| backend.memory_limit())
    }

    fn memlimit_set(&self, limit: u64) -> EngineResult<()> {
        let mut slot = self.shared().backend.lock();
        let backend = slot.as_mut().ok_or(EngineError::ShutdownInProgress)?;
        backend.set_memory_limit(limit)?;
        debug!(stream = self.id(), limit, "Memory limit set");
        Ok(())
    }

    fn total_in(&self) -> u64 {
        self.shared()
            .backend
            .lock()
            .as_ref()
            .map_or(0, |backend| backend.total_in())
    }

    fn total_out(&self) -> u64 {
        self.shared()
            .backend
            .lock()
            .as_ref()
            .map_or(0, |backend| backend.total_out())
    }

    fn init_encoder(&self, options: EncoderOptions) -> EngineResult<()> {
        replace_backend(self, Box::new(ZstdEncoder::new(options)?))
    }

    fn init_decoder(&self, options: DecoderOptions) -> EngineResult<()> {
        replace_backend(self, Box::new(ZstdDecoder::new(options)?))
    }
}

/// Swap in a freshly initialised backend between streams
fn replace_backend(engine: &StreamEngine, backend: Box<dyn CodecBackend>) -> EngineResult<()> {
    let shared = engine.shared();
    let mut guard = shared.inner.lock();

    if guard.lifecycle.is_shutting_down() {
        return Err(EngineError::ShutdownInProgress);
    }
    if guard.state.is_terminal() {
        return Err(UsageError::TerminalPending.into());
    }
    if guard.state.is_running() || guard.has_input() {
        return Err(UsageError::DriverActive.into());
    }

    let name = backend.name();
    let previous = shared.backend.lock().replace(backend);
    guard.input = ChunkQueue::new();
    guard.processed = 0;
    guard.awaiting_data = false;
    guard.mode = None;
    drop(guard);
    drop(previous);

    debug!(stream = shared.id, backend = name, "Backend initialised");
    Ok(())
}
