//! Stream Engine - drive loop
//!
//! A `StreamEngine` owns one codec backend, an input and an output
//! queue, and the loop that feeds one into the other.
//!
//! # Locking
//!
//! ```text
//!   inner (Mutex<Inner>)      queues, state, flags, handler, bridge
//!     └─▶ backend (Mutex)     codec state, locked alone around `step`
//! ```
//!
//! The drive loop holds `inner` except around the backend step and
//! around handler calls. `backend` may be taken while `inner` is held,
//! never the other way round.
//!
//! # Modes
//!
//! - Sync: the loop runs on the submitting thread and returns once the
//!   queued input is used up. Notifications are delivered inline.
//! - Async: a worker thread runs the loop until the stream ends,
//!   sleeping on `input_ready` between submissions. Notifications are
//!   queued for the host and delivered when it dispatches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use brook_codec::{
    Action, BackendError, CodecBackend, DecoderOptions, EncoderOptions, StepResult, ZstdDecoder,
    ZstdEncoder,
};

use crate::bridge::{self, NotificationBridge};
use crate::config::EngineConfig;
use crate::error::{EngineResult, UsageError};
use crate::lifecycle::{self, LifecycleFlags};
use crate::message::{DriveMode, NotificationHandler, Terminal};
use crate::queue::{Chunk, ChunkQueue, Cursor};
use crate::state::StreamState;

/// Process-unique engine identifier, used in logs and host wakeups
pub type StreamId = u64;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type BackendSlot = Mutex<Option<Box<dyn CodecBackend>>>;

/// State shared between the engine handle, its worker and a host loop
pub(crate) struct Shared {
    pub(crate) id: StreamId,
    pub(crate) config: EngineConfig,
    pub(crate) inner: Mutex<Inner>,
    /// `None` once the engine has been released
    pub(crate) backend: BackendSlot,
    /// New input, finish or shutdown
    pub(crate) input_ready: Condvar,
    /// Worker retired or handler returned
    pub(crate) lifespan: Condvar,
}

pub(crate) struct Inner {
    pub(crate) input: ChunkQueue,
    pub(crate) output: ChunkQueue,
    /// Chunk the backend is part-way through
    pub(crate) cursor: Option<Cursor>,
    pub(crate) state: StreamState,
    /// Input chunks consumed since the last `Progress`
    pub(crate) processed: usize,
    /// The last stream ended before its end marker arrived and nothing
    /// has been submitted since
    pub(crate) awaiting_data: bool,
    pub(crate) mode: Option<DriveMode>,
    pub(crate) lifecycle: LifecycleFlags,
    pub(crate) handler: Option<Box<dyn NotificationHandler>>,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) bridge: NotificationBridge,
}

impl Inner {
    fn new() -> Self {
        Self {
            input: ChunkQueue::new(),
            output: ChunkQueue::new(),
            cursor: None,
            state: StreamState::Ready,
            processed: 0,
            awaiting_data: false,
            mode: None,
            lifecycle: LifecycleFlags::default(),
            handler: None,
            worker: None,
            bridge: NotificationBridge::new(),
        }
    }

    pub(crate) fn finish_requested(&self) -> bool {
        self.input.is_ended()
    }

    pub(crate) fn has_input(&self) -> bool {
        self.cursor.is_some() || !self.input.is_empty()
    }

    pub(crate) fn is_async(&self) -> bool {
        self.mode == Some(DriveMode::Async)
    }

    /// Load the next non-empty chunk into the cursor. The end marker is
    /// acknowledged as soon as it is reached.
    fn pull_input(&mut self) {
        while self.cursor.is_none() {
            match self.input.pop() {
                Some(chunk) if chunk.is_empty() => self.processed += 1,
                Some(chunk) => self.cursor = Some(Cursor::new(chunk)),
                None => break,
            }
        }
    }

    /// Put the cursor back after a step, acknowledging it if used up
    fn consume(&mut self, cursor: Option<Cursor>, consumed: usize) {
        if let Some(mut cursor) = cursor {
            if cursor.advance(consumed) {
                self.processed += 1;
            } else {
                self.cursor = Some(cursor);
            }
        }
    }

    /// Drop input the ended stream will never read; it still counts as processed
    fn discard_input(&mut self) -> usize {
        let discarded = usize::from(self.cursor.take().is_some()) + self.input.drain().count();
        self.processed += discarded;
        discarded
    }

    fn stage(&mut self, terminal: Option<Terminal>) -> usize {
        let Inner {
            bridge,
            output,
            processed,
            ..
        } = self;
        bridge.stage(output, processed, terminal)
    }

    /// Start over for the next stream once a terminal status is delivered
    pub(crate) fn reset_stream(&mut self, backend: &BackendSlot) {
        if let Some(backend) = backend.lock().as_mut() {
            backend.reset();
        }
        self.state.reset();
        // Stream ended on its own: the caller's end marker may still be on its way
        self.awaiting_data = !self.input.is_ended();
        self.input = ChunkQueue::new();
        self.output = ChunkQueue::new();
        self.cursor = None;
        self.processed = 0;
        self.mode = None;
    }

    /// Empty everything at shutdown. Returns the number of chunks dropped
    /// and the handler, to be dropped outside the lock.
    pub(crate) fn release(&mut self) -> (usize, Option<Box<dyn NotificationHandler>>) {
        let chunks = usize::from(self.cursor.take().is_some())
            + self.input.drain().count()
            + self.output.drain().count();
        let notifications = self.bridge.clear();
        if notifications > 0 {
            debug!(notifications, "Dropping undelivered notifications");
        }
        (chunks, self.handler.take())
    }
}

/// Drives one codec stream, inline or on a worker thread
///
/// Operations are provided through [`StreamControl`](crate::StreamControl).
/// Dropping the engine is the only way to cancel a stream; it waits for a
/// running worker step and a running handler call to finish first.
pub struct StreamEngine {
    shared: Arc<Shared>,
}

impl StreamEngine {
    /// Create an engine with default configuration
    pub fn new(backend: impl CodecBackend + 'static) -> EngineResult<Self> {
        Self::with_config(backend, EngineConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(
        backend: impl CodecBackend + 'static,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate().map_err(UsageError::InvalidConfig)?;

        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        debug!(stream = id, backend = backend.name(), "Engine created");

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                config,
                inner: Mutex::new(Inner::new()),
                backend: Mutex::new(Some(Box::new(backend))),
                input_ready: Condvar::new(),
                lifespan: Condvar::new(),
            }),
        })
    }

    /// Zstd compressing engine
    pub fn encoder(options: EncoderOptions) -> EngineResult<Self> {
        Self::new(ZstdEncoder::new(options)?)
    }

    /// Zstd decompressing engine
    pub fn decoder(options: DecoderOptions) -> EngineResult<Self> {
        Self::new(ZstdDecoder::new(options)?)
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn state(&self) -> StreamState {
        self.shared.inner.lock().state.clone()
    }

    /// True while the current stream is driven by a worker
    pub fn is_async(&self) -> bool {
        self.shared.inner.lock().is_async()
    }

    /// Input chunks not yet fully consumed, including the end marker
    pub fn pending_input(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.input.len() + usize::from(inner.cursor.is_some())
    }

    /// Notifications queued for delivery
    pub fn pending_notifications(&self) -> usize {
        self.shared.inner.lock().bridge.pending()
    }

    /// Deliver queued notifications on this thread
    ///
    /// For engines not attached to a [`HostLoop`](crate::HostLoop). Returns
    /// the number of handler calls made.
    pub fn dispatch(&self) -> usize {
        let mut guard = self.shared.inner.lock();
        bridge::dispatch(&self.shared, &mut guard)
    }

    /// Wait up to `timeout` for a worker to queue notifications, then
    /// dispatch whatever is queued
    pub fn wait_and_dispatch(&self, timeout: Duration) -> usize {
        let signal = {
            let guard = self.shared.inner.lock();
            if guard.bridge.pending() > 0 {
                None
            } else {
                Some(guard.bridge.signal())
            }
        };
        if let Some(signal) = signal {
            let _ = signal.recv_timeout(timeout);
        }
        self.dispatch()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        lifecycle::shutdown(&self.shared);
    }
}

/// Run the drive loop until the queued input is used up (sync), the
/// stream ends, or shutdown begins
///
/// Called with the stream claimed (`Running`) and the lock held.
pub(crate) fn drive(shared: &Shared, guard: &mut MutexGuard<'_, Inner>, mode: DriveMode) {
    let mut output = vec![0u8; shared.config.buffer_size];
    let mut stalled = 0u32;
    let mut output_full = false;

    loop {
        if guard.lifecycle.is_shutting_down() {
            break;
        }

        // A full output buffer may hide more pending output: step again
        // even with no new input
        if !guard.has_input() && !guard.finish_requested() && !output_full {
            if mode == DriveMode::Sync {
                break;
            }
            flush(shared, guard, mode, None);
            shared.input_ready.wait_while(guard, |inner| {
                !inner.has_input()
                    && !inner.finish_requested()
                    && !inner.lifecycle.is_shutting_down()
            });
            continue;
        }

        guard.pull_input();
        let action = if guard.finish_requested() && guard.input.is_empty() {
            Action::Finish
        } else {
            Action::Run
        };

        let cursor = guard.cursor.take();
        let step = MutexGuard::unlocked(guard, || {
            let input = cursor.as_ref().map_or(&[][..], |c| c.remaining());
            shared
                .backend
                .lock()
                .as_mut()
                .map(|backend| backend.step(input, &mut output, action))
        });
        let Some(step) = step else {
            guard.cursor = cursor;
            break;
        };
        trace!(
            stream = shared.id,
            consumed = step.consumed,
            produced = step.produced,
            ?action,
            "step"
        );

        guard.consume(cursor, step.consumed);
        if step.produced > 0 {
            guard.output.push(Chunk::from(&output[..step.produced]));
        }
        output_full = step.produced == output.len();

        match step.result {
            StepResult::Ok => {}
            StepResult::StreamEnd => {
                return finish_stream(shared, guard, mode, Terminal::StreamEnd);
            }
            StepResult::Error(err) => {
                return finish_stream(shared, guard, mode, Terminal::Error(err));
            }
        }

        if output_full || guard.cursor.is_none() {
            flush(shared, guard, mode, None);
        }

        if step.made_progress() {
            stalled = 0;
            continue;
        }
        if !guard.has_input() && !guard.finish_requested() {
            // Backend is waiting on the caller
            continue;
        }

        stalled += 1;
        if stalled >= shared.config.max_stalled_steps {
            warn!(
                "Stream {} made no progress for {} steps, failing it",
                shared.id, stalled
            );
            let err = BackendError::stalled(stalled);
            return finish_stream(shared, guard, mode, Terminal::Error(err));
        }
    }

    if !guard.lifecycle.is_shutting_down() {
        flush(shared, guard, mode, None);
    }
    guard.state.pause();
    if mode == DriveMode::Async {
        lifecycle::retire_worker(shared, guard);
    }
}

/// Stage whatever is pending and get it delivered
fn flush(
    shared: &Shared,
    guard: &mut MutexGuard<'_, Inner>,
    mode: DriveMode,
    terminal: Option<Terminal>,
) {
    if guard.stage(terminal) == 0 {
        return;
    }
    match mode {
        DriveMode::Sync => {
            bridge::dispatch(shared, guard);
        }
        DriveMode::Async => guard.bridge.wake(),
    }
}

fn finish_stream(
    shared: &Shared,
    guard: &mut MutexGuard<'_, Inner>,
    mode: DriveMode,
    terminal: Terminal,
) {
    let discarded = guard.discard_input();
    if discarded > 0 {
        debug!(stream = shared.id, discarded, "Discarding input after terminal status");
    }
    match &terminal {
        Terminal::StreamEnd => debug!(stream = shared.id, "Stream end"),
        Terminal::Error(err) => warn!("Stream {} failed: {}", shared.id, err),
    }

    guard.state.end(&terminal);
    if mode == DriveMode::Async {
        lifecycle::retire_worker(shared, guard);
    }
    flush(shared, guard, mode, Some(terminal));
}
