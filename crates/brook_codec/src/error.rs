//! Codec Error Types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Input is not in a recognised format (bad magic, unsupported version)
    Format,
    /// Input is recognised but corrupt
    Data,
    /// Integrity check failed after decoding
    Checksum,
    /// Stream needs more memory than the configured limit allows
    MemoryLimit,
    /// Allocation failed
    Memory,
    /// Invalid or unsupported option
    Options,
    /// Input ended in the middle of a stream
    Truncated,
    /// Backend stopped making progress
    Stalled,
    /// Anything the backend reports that fits none of the above
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Format => "format error",
            ErrorKind::Data => "data error",
            ErrorKind::Checksum => "checksum mismatch",
            ErrorKind::MemoryLimit => "memory limit exceeded",
            ErrorKind::Memory => "out of memory",
            ErrorKind::Options => "invalid options",
            ErrorKind::Truncated => "truncated input",
            ErrorKind::Stalled => "no forward progress",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecoverable condition reported by a backend step
///
/// `code` is the backend's own numeric error code, carried through to
/// terminal notifications untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} (code {code}): {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
}

/// Code used for conditions the engine detects itself rather than the backend
pub const ENGINE_STALL_CODE: u32 = 0x1000;

impl BackendError {
    pub fn new(kind: ErrorKind, code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Repeated no-progress steps
    pub fn stalled(steps: u32) -> Self {
        Self::new(
            ErrorKind::Stalled,
            ENGINE_STALL_CODE,
            format!("backend made no progress for {} consecutive steps", steps),
        )
    }

    pub fn is_memory_limit(&self) -> bool {
        self.kind == ErrorKind::MemoryLimit
    }
}

/// Errors raised while configuring a codec
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid codec option: {0}")]
    InvalidOption(String),

    #[error("Operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Result type alias for codec configuration
pub type CodecResult<T> = Result<T, CodecError>;
