//! Codec Backend Trait
//!
//! Defines the incremental step interface the engine drives.
//! A backend consumes as much input as it can and produces as much
//! output as fits, one call at a time.

use crate::error::{BackendError, CodecError};

/// What the caller wants from a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Process input, more may follow
    Run,
    /// No more input will follow; flush everything and end the stream
    Finish,
}

/// Outcome code of a single step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Ok,
    StreamEnd,
    Error(BackendError),
}

impl StepResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepResult::Ok)
    }
}

/// Bookkeeping returned from [`CodecBackend::step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Bytes taken from the front of `input`
    pub consumed: usize,
    /// Bytes written to the front of `output`
    pub produced: usize,
    pub result: StepResult,
}

impl Step {
    pub fn ok(consumed: usize, produced: usize) -> Self {
        Self {
            consumed,
            produced,
            result: StepResult::Ok,
        }
    }

    pub fn stream_end(consumed: usize, produced: usize) -> Self {
        Self {
            consumed,
            produced,
            result: StepResult::StreamEnd,
        }
    }

    pub fn error(consumed: usize, produced: usize, error: BackendError) -> Self {
        Self {
            consumed,
            produced,
            result: StepResult::Error(error),
        }
    }

    /// Neither input was consumed nor output produced
    pub fn made_progress(&self) -> bool {
        self.consumed > 0 || self.produced > 0
    }
}

/// Trait for incremental encoders and decoders
///
/// # Contract
///
/// - `step` never blocks on anything but CPU work and memory allocation.
/// - After `StreamEnd` or `Error` the engine calls `step` again only
///   after `reset`.
/// - `reset` restores the state right after construction, keeping the
///   configuration (level, memory limit, ...) and clearing totals.
pub trait CodecBackend: Send {
    /// Advance the stream
    fn step(&mut self, input: &[u8], output: &mut [u8], action: Action) -> Step;

    /// Reinitialise for a new stream with the same configuration
    fn reset(&mut self);

    /// Current memory footprint in bytes, if known
    fn memory_usage(&self) -> Option<u64>;

    /// Configured memory limit, if the backend has one
    fn memory_limit(&self) -> Option<u64> {
        None
    }

    /// Change the memory limit
    fn set_memory_limit(&mut self, _limit: u64) -> Result<(), CodecError> {
        Err(CodecError::Unsupported {
            backend: self.name(),
            operation: "set_memory_limit",
        })
    }

    /// Total input bytes consumed since the last reset
    fn total_in(&self) -> u64;

    /// Total output bytes produced since the last reset
    fn total_out(&self) -> u64;

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}

impl<B: CodecBackend + ?Sized> CodecBackend for Box<B> {
    fn step(&mut self, input: &[u8], output: &mut [u8], action: Action) -> Step {
        (**self).step(input, output, action)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn memory_usage(&self) -> Option<u64> {
        (**self).memory_usage()
    }

    fn memory_limit(&self) -> Option<u64> {
        (**self).memory_limit()
    }

    fn set_memory_limit(&mut self, limit: u64) -> Result<(), CodecError> {
        (**self).set_memory_limit(limit)
    }

    fn total_in(&self) -> u64 {
        (**self).total_in()
    }

    fn total_out(&self) -> u64 {
        (**self).total_out()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
