//! Notification Bridge
//!
//! The driving thread stages each batch of notifications onto an
//! unbounded channel and wakes whoever delivers them: the submitting
//! thread itself in sync mode, the attached [`HostLoop`] (or a manual
//! `wait_and_dispatch`) in async mode.
//!
//! Delivery drains the channel completely, so any number of wakes that
//! pile up before the host gets around to it collapse into one pass.
//!
//! [`HostLoop`]: crate::HostLoop

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::MutexGuard;
use tracing::{debug, trace};

use crate::engine::{Inner, Shared, StreamId};
use crate::host::HostMessage;
use crate::message::{Notification, Terminal};
use crate::queue::ChunkQueue;

pub(crate) struct NotificationBridge {
    events_tx: Sender<Notification>,
    events_rx: Receiver<Notification>,

    /// Capacity-one wake flag for hosts that poll a single engine
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,

    host: Option<(StreamId, Sender<HostMessage>)>,
}

impl NotificationBridge {
    pub(crate) fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        let (signal_tx, signal_rx) = bounded(1);
        Self {
            events_tx,
            events_rx,
            signal_tx,
            signal_rx,
            host: None,
        }
    }

    /// Queue one batch: output chunks, then the processed count, then the
    /// terminal status. Returns how many notifications were queued.
    pub(crate) fn stage(
        &self,
        output: &mut ChunkQueue,
        processed: &mut usize,
        terminal: Option<Terminal>,
    ) -> usize {
        let mut staged = 0;
        for chunk in output.drain() {
            self.send(Notification::Data(chunk));
            staged += 1;
        }
        if *processed > 0 {
            self.send(Notification::Progress(std::mem::take(processed)));
            staged += 1;
        }
        if let Some(terminal) = terminal {
            self.send(Notification::Terminal(terminal));
            staged += 1;
        }
        staged
    }

    fn send(&self, notification: Notification) {
        // The receiver lives in the same struct, so this cannot fail
        let _ = self.events_tx.send(notification);
    }

    pub(crate) fn next(&self) -> Option<Notification> {
        self.events_rx.try_recv().ok()
    }

    pub(crate) fn pending(&self) -> usize {
        self.events_rx.len()
    }

    /// Tell the delivering side there is something to drain
    pub(crate) fn wake(&self) {
        let _ = self.signal_tx.try_send(());
        if let Some((stream, host)) = &self.host {
            if host.send(HostMessage::Wake(*stream)).is_err() {
                trace!(stream = *stream, "host loop gone, wake dropped");
            }
        }
    }

    pub(crate) fn signal(&self) -> Receiver<()> {
        self.signal_rx.clone()
    }

    pub(crate) fn attach(&mut self, stream: StreamId, host: Sender<HostMessage>) {
        self.host = Some((stream, host));
    }

    pub(crate) fn detach(&mut self) -> bool {
        self.host.take().is_some()
    }

    /// Drop every undelivered notification
    pub(crate) fn clear(&self) -> usize {
        self.events_rx.try_iter().count()
    }
}

/// Deliver every queued notification to the registered handler
///
/// Runs on whichever thread calls it, with the engine lock released
/// around each handler call. After a terminal status is delivered the
/// stream resets for reuse. Without a handler nothing is delivered and
/// the notifications stay queued.
pub(crate) fn dispatch(shared: &Shared, guard: &mut MutexGuard<'_, Inner>) -> usize {
    if guard.lifecycle.is_shutting_down() || guard.lifecycle.callback_running() {
        return 0;
    }
    let Some(mut handler) = guard.handler.take() else {
        return 0;
    };
    guard.lifecycle.enter_callback();

    let mut delivered = 0;
    while !guard.lifecycle.is_shutting_down() {
        let Some(notification) = guard.bridge.next() else {
            break;
        };
        let terminal = notification.is_terminal();
        MutexGuard::unlocked(guard, || handler.handle(notification));
        delivered += 1;

        if terminal {
            guard.reset_stream(&shared.backend);
            debug!(stream = shared.id, "terminal status delivered, stream reset");
        }
    }

    // The engine may have been dropped from inside the handler; a
    // released engine keeps no handler. A handler may also have
    // installed its own replacement while running.
    let stale = if guard.handler.is_none() && !guard.lifecycle.is_shutting_down() {
        guard.handler = Some(handler);
        None
    } else {
        Some(handler)
    };
    guard.lifecycle.exit_callback();
    shared.lifespan.notify_all();

    if stale.is_some() {
        MutexGuard::unlocked(guard, || drop(stale));
    }
    delivered
}
