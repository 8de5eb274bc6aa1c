//! Host Loop
//!
//! A single-threaded cooperative loop that delivers notifications for
//! every attached engine and runs unrelated tasks posted to it.
//!
//! ```text
//!   worker A ──Wake(a)──┐
//!   worker B ──Wake(b)──┼──▶ wake channel ──▶ HostLoop::turn
//!   handle   ──Task(f)──┘                      ├─ runs tasks in order
//!                                              └─ dispatches a, b once each
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::bridge;
use crate::config::HostConfig;
use crate::engine::{Shared, StreamEngine, StreamId};
use crate::error::{EngineError, EngineResult};
use crate::message::DriveMode;

type Task = Box<dyn FnOnce() + Send>;

/// Messages the host loop receives
pub enum HostMessage {
    /// Notifications are queued for this stream
    Wake(StreamId),
    /// Arbitrary work to run on the host thread
    Task(Task),
}

impl fmt::Debug for HostMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostMessage::Wake(id) => f.debug_tuple("Wake").field(id).finish(),
            HostMessage::Task(_) => f.write_str("Task(..)"),
        }
    }
}

/// Cloneable handle for posting work to a host loop from any thread
#[derive(Clone)]
pub struct HostHandle {
    sender: Sender<HostMessage>,
}

impl HostHandle {
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> EngineResult<()> {
        self.sender
            .send(HostMessage::Task(Box::new(task)))
            .map_err(|_| EngineError::ChannelSendError)
    }
}

/// Delivers notifications for attached engines on the thread that runs it
pub struct HostLoop {
    config: HostConfig,
    sender: Sender<HostMessage>,
    receiver: Receiver<HostMessage>,
    streams: HashMap<StreamId, Weak<Shared>>,
}

impl Default for HostLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLoop {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            config,
            sender,
            receiver,
            streams: HashMap::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run `task` on the host thread during a later turn
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        // We hold the receiver, so the channel is open
        let _ = self.sender.send(HostMessage::Task(Box::new(task)));
    }

    /// Route `engine`'s notifications through this loop
    ///
    /// Anything already queued is picked up on the next turn.
    pub fn attach(&mut self, engine: &StreamEngine) {
        let shared = engine.shared();
        {
            let mut guard = shared.inner.lock();
            guard.bridge.attach(shared.id, self.sender.clone());
            if guard.bridge.pending() > 0 {
                guard.bridge.wake();
            }
        }
        self.streams.insert(shared.id, Arc::downgrade(shared));
        debug!(stream = shared.id, "Attached to host loop");
    }

    /// Stop routing `engine`'s notifications here
    pub fn detach(&mut self, engine: &StreamEngine) -> bool {
        let shared = engine.shared();
        shared.inner.lock().bridge.detach();
        self.streams.remove(&shared.id).is_some()
    }

    /// Number of attached engines still alive
    pub fn attached(&mut self) -> usize {
        self.prune();
        self.streams.len()
    }

    /// Attached engines currently in asynchronous mode
    pub fn async_streams(&mut self) -> usize {
        self.prune();
        self.streams
            .values()
            .filter_map(Weak::upgrade)
            .filter(|shared| shared.inner.lock().is_async())
            .count()
    }

    /// Mode a new submission should use: async while the budget of async
    /// streams lasts, sync after that unless forced
    pub fn preferred_mode(&mut self, force_async: bool) -> DriveMode {
        if force_async || self.async_streams() < self.config.max_async_streams {
            DriveMode::Async
        } else {
            DriveMode::Sync
        }
    }

    /// Wait up to `timeout` (forever if `None`) for messages, then handle
    /// everything queued. Each woken stream is dispatched once no matter
    /// how many wakes it sent.
    ///
    /// Returns the number of tasks run plus notifications delivered.
    pub fn turn(&mut self, timeout: Option<Duration>) -> EngineResult<usize> {
        let first = match timeout {
            None => self
                .receiver
                .recv()
                .map_err(|_| EngineError::ChannelRecvError)?,
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::ChannelRecvError),
            },
        };
        let batch: Vec<HostMessage> = std::iter::once(first)
            .chain(self.receiver.try_iter())
            .collect();
        trace!(messages = batch.len(), "Host turn");

        let mut woken = HashSet::new();
        let mut work = 0;
        for message in batch {
            match message {
                HostMessage::Task(task) => {
                    task();
                    work += 1;
                }
                HostMessage::Wake(id) => {
                    if woken.insert(id) {
                        work += self.dispatch_stream(id);
                    }
                }
            }
        }
        Ok(work)
    }

    /// Turn until nothing is left to do
    pub fn run_until_idle(&mut self) -> EngineResult<usize> {
        let mut total = 0;
        loop {
            let work = self.turn(Some(Duration::ZERO))?;
            if work == 0 {
                return Ok(total);
            }
            total += work;
        }
    }

    /// Turn until `done` returns true, waiting at most `poll` per turn
    pub fn run_until(
        &mut self,
        mut done: impl FnMut() -> bool,
        poll: Duration,
    ) -> EngineResult<usize> {
        let mut total = 0;
        while !done() {
            total += self.turn(Some(poll))?;
        }
        Ok(total)
    }

    fn dispatch_stream(&mut self, id: StreamId) -> usize {
        let Some(shared) = self.streams.get(&id).and_then(Weak::upgrade) else {
            self.streams.remove(&id);
            return 0;
        };
        let mut guard = shared.inner.lock();
        bridge::dispatch(&shared, &mut guard)
    }

    fn prune(&mut self) {
        self.streams.retain(|_, shared| shared.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    use brook_codec::{DecoderOptions, EncoderOptions};
    use parking_lot::Mutex;

    use crate::control::StreamControl;
    use crate::message::{Input, Notification, Terminal};
    use crate::testing::{concat_data, EchoBackend};

    const POLL: Duration = Duration::from_millis(10);

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 13) % 241) as u8).collect()
    }

    #[test]
    fn test_turn_times_out() {
        let mut host = HostLoop::new();
        assert_eq!(host.turn(Some(POLL)).unwrap(), 0);
        assert_eq!(host.run_until_idle().unwrap(), 0);
    }

    #[test]
    fn test_posted_tasks_run_in_order() {
        let mut host = HostLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            host.post(move || order.lock().push(i));
        }
        let handle = host.handle();
        let from_thread = Arc::clone(&order);
        thread::spawn(move || handle.post(move || from_thread.lock().push(3)).unwrap())
            .join()
            .unwrap();

        assert_eq!(host.run_until_idle().unwrap(), 4);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_pipeline_through_host() {
        let data = sample_data(256 * 1024);
        let mut host = HostLoop::new();

        let encoder = StreamEngine::encoder(EncoderOptions::default()).unwrap();
        let decoder = Arc::new(StreamEngine::decoder(DecoderOptions::default()).unwrap());
        host.attach(&encoder);
        host.attach(&decoder);

        let downstream = Arc::clone(&decoder);
        encoder.set_handler(move |n: Notification| match n {
            Notification::Data(chunk) => {
                downstream.submit(Input::Data(chunk), DriveMode::Async).unwrap()
            }
            Notification::Terminal(Terminal::StreamEnd) => {
                downstream.submit(Input::End, DriveMode::Async).unwrap()
            }
            Notification::Terminal(Terminal::Error(err)) => panic!("encoder failed: {}", err),
            Notification::Progress(_) => {}
        });

        let restored = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicBool::new(false));
        {
            let restored = Arc::clone(&restored);
            let finished = Arc::clone(&finished);
            decoder.set_handler(move |n: Notification| match n {
                Notification::Data(chunk) => restored.lock().extend_from_slice(&chunk),
                Notification::Terminal(terminal) => {
                    assert_eq!(terminal, Terminal::StreamEnd);
                    finished.store(true, Ordering::SeqCst);
                }
                Notification::Progress(_) => {}
            });
        }

        for chunk in data.chunks(host.config().input_chunk_size) {
            encoder.submit(Input::from(chunk), DriveMode::Async).unwrap();
        }
        encoder.submit(Input::End, DriveMode::Async).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        host.run_until(
            || finished.load(Ordering::SeqCst) || Instant::now() > deadline,
            POLL,
        )
        .unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(*restored.lock(), data);
    }

    #[test]
    fn test_duplicate_wakes_coalesced() {
        let mut host = HostLoop::new();
        let config = crate::EngineConfig {
            buffer_size: 64,
            ..Default::default()
        };
        let engine = StreamEngine::with_config(EchoBackend::new(), config).unwrap();
        host.attach(&engine);

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        engine.set_handler(move |n: Notification| sink.lock().push(n));

        let data = sample_data(4096);
        engine.submit(Input::from(data.clone()), DriveMode::Async).unwrap();
        engine.submit(Input::End, DriveMode::Async).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !engine.state().is_terminal() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }

        let queued = engine.pending_notifications();
        assert!(queued > 2);
        assert_eq!(host.turn(Some(POLL)).unwrap(), queued);
        assert_eq!(host.turn(Some(POLL)).unwrap(), 0);
        assert_eq!(concat_data(&log.lock()), data);
    }

    #[test]
    fn test_attach_picks_up_queued_notifications() {
        let engine = StreamEngine::new(EchoBackend::new()).unwrap();
        engine.submit(Input::from(&b"early"[..]), DriveMode::Sync).unwrap();
        assert_eq!(engine.pending_notifications(), 2);

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let mut host = HostLoop::new();
        host.attach(&engine);
        engine.set_handler(move |n: Notification| sink.lock().push(n));

        // Sync-mode engine: registration delivers inline
        assert_eq!(log.lock().len(), 2);
        assert_eq!(host.run_until_idle().unwrap(), 0);
    }

    #[test]
    fn test_async_budget() {
        let mut host = HostLoop::with_config(HostConfig {
            max_async_streams: 1,
            ..Default::default()
        });
        let first = StreamEngine::new(EchoBackend::new()).unwrap();
        let second = StreamEngine::new(EchoBackend::new()).unwrap();
        host.attach(&first);
        host.attach(&second);

        assert_eq!(host.preferred_mode(false), DriveMode::Async);
        first.submit(Input::from(&b"open"[..]), DriveMode::Async).unwrap();
        assert_eq!(host.async_streams(), 1);
        assert_eq!(host.preferred_mode(false), DriveMode::Sync);
        assert_eq!(host.preferred_mode(true), DriveMode::Async);
    }

    #[test]
    fn test_dropped_engines_pruned() {
        let mut host = HostLoop::new();
        let engine = StreamEngine::new(EchoBackend::new()).unwrap();
        host.attach(&engine);
        assert_eq!(host.attached(), 1);
        drop(engine);
        assert_eq!(host.attached(), 0);
    }

    #[test]
    fn test_detach() {
        let mut host = HostLoop::new();
        let engine = StreamEngine::new(EchoBackend::new()).unwrap();
        host.attach(&engine);
        assert!(host.detach(&engine));
        assert!(!host.detach(&engine));
        assert_eq!(host.attached(), 0);
    }

    #[test]
    fn test_handler_may_drop_engine() {
        let mut host = HostLoop::new();
        let engine = StreamEngine::new(EchoBackend::new()).unwrap();
        host.attach(&engine);

        let slot = Arc::new(Mutex::new(None::<StreamEngine>));
        let inside = Arc::clone(&slot);
        engine.set_handler(move |n: Notification| {
            if n.is_terminal() {
                let engine = inside.lock().take();
                drop(engine);
            }
        });

        engine.submit(Input::from(&b"bye"[..]), DriveMode::Async).unwrap();
        engine.submit(Input::End, DriveMode::Async).unwrap();
        *slot.lock() = Some(engine);

        let deadline = Instant::now() + Duration::from_secs(10);
        host.run_until(
            || slot.lock().is_none() || Instant::now() > deadline,
            POLL,
        )
        .unwrap();
        assert!(slot.lock().is_none());
        assert_eq!(host.attached(), 0);
    }

    #[test]
    fn test_handler_released_with_its_engine() {
        let mut host = HostLoop::new();
        let engine = StreamEngine::new(EchoBackend::new()).unwrap();
        host.attach(&engine);
        let shared = Arc::clone(engine.shared());

        let token = Arc::new(());
        let held = Arc::clone(&token);
        let slot = Arc::new(Mutex::new(None::<StreamEngine>));
        let inside = Arc::clone(&slot);
        engine.set_handler(move |n: Notification| {
            let _held = &held;
            if n.is_terminal() {
                let engine = inside.lock().take();
                drop(engine);
            }
        });

        engine.submit(Input::from(&b"bye"[..]), DriveMode::Async).unwrap();
        engine.submit(Input::End, DriveMode::Async).unwrap();
        *slot.lock() = Some(engine);

        let deadline = Instant::now() + Duration::from_secs(10);
        host.run_until(
            || slot.lock().is_none() || Instant::now() > deadline,
            POLL,
        )
        .unwrap();

        assert!(slot.lock().is_none());
        assert!(shared.inner.lock().handler.is_none());
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_corrupt_stream_error_through_host() {
        let mut host = HostLoop::new();
        let engine = StreamEngine::decoder(DecoderOptions::default()).unwrap();
        host.attach(&engine);

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        engine.set_handler(move |n: Notification| sink.lock().push(n));

        engine
            .submit(Input::from(&b"this is not a zstd frame"[..]), DriveMode::Async)
            .unwrap();
        // Worker may already have failed; the end marker is still accepted
        engine.submit(Input::End, DriveMode::Async).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        host.run_until(
            || log.lock().iter().any(Notification::is_terminal) || Instant::now() > deadline,
            POLL,
        )
        .unwrap();
        host.run_until_idle().unwrap();

        let events = log.lock();
        assert_eq!(events.iter().filter(|n| n.is_terminal()).count(), 1);
        match events.last() {
            Some(Notification::Terminal(Terminal::Error(err))) => {
                assert_eq!(err.kind, brook_codec::ErrorKind::Format)
            }
            other => panic!("expected terminal error last, got {:?}", other),
        }
        assert_eq!(engine.state(), crate::StreamState::Ready);
        assert!(!engine.is_async());
    }

    #[test]
    fn test_drop_waits_for_running_handler() {
        let engine = StreamEngine::new(EchoBackend::new()).unwrap();
        let mut host = HostLoop::new();
        host.attach(&engine);

        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        engine.set_handler(move |n: Notification| {
            if matches!(n, Notification::Data(_)) {
                let _ = entered_tx.send(());
                let _ = release_rx.recv();
            }
        });

        let stop = Arc::new(AtomicBool::new(false));
        let host_thread = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                host.run_until(|| stop.load(Ordering::SeqCst), POLL).unwrap();
            })
        };

        engine.submit(Input::from(&b"data"[..]), DriveMode::Async).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let dropped = Arc::new(AtomicBool::new(false));
        let dropper = {
            let dropped = Arc::clone(&dropped);
            thread::spawn(move || {
                drop(engine);
                dropped.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!dropped.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        dropper.join().unwrap();
        assert!(dropped.load(Ordering::SeqCst));

        stop.store(true, Ordering::SeqCst);
        host_thread.join().unwrap();
    }
}
