//! Message Types for Thread Communication
//!
//! Input flows from the caller -> engine.
//! Notifications flow from the driving thread -> host thread.

use serde::{Deserialize, Serialize};

use brook_codec::BackendError;

use crate::queue::Chunk;

/// What a caller hands to `submit`
#[derive(Debug)]
pub enum Input {
    /// More bytes of the current stream. A zero-length chunk ends the input.
    Data(Chunk),

    /// No more input for the current stream
    End,
}

impl Input {
    pub fn is_end(&self) -> bool {
        match self {
            Input::Data(chunk) => chunk.is_empty(),
            Input::End => true,
        }
    }
}

impl From<Vec<u8>> for Input {
    fn from(bytes: Vec<u8>) -> Self {
        Input::Data(Chunk::new(bytes))
    }
}

impl From<&[u8]> for Input {
    fn from(bytes: &[u8]) -> Self {
        Input::Data(Chunk::from(bytes))
    }
}

/// `None` is end-of-input
impl From<Option<Vec<u8>>> for Input {
    fn from(bytes: Option<Vec<u8>>) -> Self {
        bytes.map_or(Input::End, Input::from)
    }
}

/// Where the drive loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveMode {
    /// Inline on the submitting thread
    Sync,
    /// On a dedicated worker thread, notifications delivered by the host
    Async,
}

impl From<bool> for DriveMode {
    fn from(asynchronous: bool) -> Self {
        if asynchronous {
            DriveMode::Async
        } else {
            DriveMode::Sync
        }
    }
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error")]
pub enum Terminal {
    StreamEnd,
    Error(BackendError),
}

impl Terminal {
    pub fn is_error(&self) -> bool {
        matches!(self, Terminal::Error(_))
    }

    pub fn error(&self) -> Option<&BackendError> {
        match self {
            Terminal::Error(err) => Some(err),
            Terminal::StreamEnd => None,
        }
    }
}

/// One call delivered to a handler
///
/// Within a batch the order is always every `Data`, then at most one
/// `Progress`, then at most one `Terminal`.
#[derive(Debug, PartialEq, Eq)]
pub enum Notification {
    /// Output bytes, in production order
    Data(Chunk),

    /// Input chunks fully consumed since the previous `Progress`
    Progress(usize),

    /// Stream finished or failed; nothing follows until the engine resets
    Terminal(Terminal),
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Notification::Terminal(_))
    }
}

/// Receives an engine's notifications on the host thread
///
/// Handlers run with the engine lock released, so they may call back
/// into the engine (submit more input, dispatch, replace the handler).
pub trait NotificationHandler: Send {
    fn on_data(&mut self, chunk: Chunk);

    fn on_progress(&mut self, processed: usize);

    fn on_terminal(&mut self, terminal: Terminal);

    /// Route a notification to the matching method
    fn handle(&mut self, notification: Notification) {
        match notification {
            Notification::Data(chunk) => self.on_data(chunk),
            Notification::Progress(count) => self.on_progress(count),
            Notification::Terminal(terminal) => self.on_terminal(terminal),
        }
    }
}

impl<F> NotificationHandler for F
where
    F: FnMut(Notification) + Send,
{
    fn on_data(&mut self, chunk: Chunk) {
        self(Notification::Data(chunk))
    }

    fn on_progress(&mut self, processed: usize) {
        self(Notification::Progress(processed))
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        self(Notification::Terminal(terminal))
    }
}
