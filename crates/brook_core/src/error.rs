//! Engine Error Types
//!
//! Backend failures are not here: they reach the caller only as a
//! terminal notification, never as an `Err` from `submit`.

use thiserror::Error;

/// The caller did something the engine's current state does not allow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("Input submitted after end-of-input")]
    InputAfterFinish,

    #[error("Terminal status has not been delivered yet - register a handler or dispatch first")]
    TerminalPending,

    #[error("Operation not allowed while the stream is being driven")]
    DriverActive,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur in the stream engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Engine is shutting down")]
    ShutdownInProgress,

    #[error("Codec error: {0}")]
    Codec(#[from] brook_codec::CodecError),

    #[error("Stream failed: {0}")]
    Stream(brook_codec::BackendError),

    #[error("Stream stopped before reaching its end")]
    Incomplete,

    #[error("Channel send error - receiver dropped")]
    ChannelSendError,

    #[error("Channel receive error - sender dropped")]
    ChannelRecvError,

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
