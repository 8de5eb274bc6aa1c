//! Brook Core - Streaming Codec Engine
//!
//! This crate drives an incremental codec over a stream of input chunks:
//! - Chunk queues with an end-of-input flag
//! - A drive loop that runs inline or on a per-stream worker thread
//! - Ordered, exactly-once notifications delivered on a host thread
//! - Teardown that waits for in-flight steps and handler calls
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Host Thread                          │
//! │  submit ──▶ StreamEngine          HostLoop::turn ──▶ handler│
//! └─────────────────────────────────────────────────────────────┘
//!        │ input queue                      ▲ Data / Progress /
//!        ▼ (Mutex + Condvar)                │ Terminal (crossbeam-channel)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Worker Thread (async mode)                  │
//! │   input ──▶ CodecBackend::step ──▶ output queue ──▶ bridge  │
//! │            (engine lock released around each step)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! In sync mode the worker box collapses into the submitting thread and
//! the handler runs inline.

mod bridge;
mod config;
mod control;
mod engine;
mod error;
mod host;
mod lifecycle;
mod message;
mod oneshot;
mod queue;
mod state;
mod worker;

#[cfg(test)]
mod testing;

pub use config::{BrookConfig, EngineConfig, HostConfig, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use control::StreamControl;
pub use engine::{StreamEngine, StreamId};
pub use error::{EngineError, EngineResult, UsageError};
pub use host::{HostHandle, HostLoop, HostMessage};
pub use message::{DriveMode, Input, Notification, NotificationHandler, Terminal};
pub use oneshot::{compress, decompress};
pub use queue::{Chunk, ChunkQueue};
pub use state::StreamState;

// Re-export codec types for convenience
pub use brook_codec::{
    preset, BackendError, CodecBackend, DecoderFlags, DecoderOptions, EncoderOptions, ErrorKind,
    Preset, ZstdDecoder, ZstdEncoder, PRESETS, PRESET_DEFAULT,
};
