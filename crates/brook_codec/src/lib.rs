//! Brook Codec - Incremental Codec Backends
//!
//! This crate provides the compression side of Brook:
//! - The [`CodecBackend`] trait the engine drives one step at a time
//! - Step vocabulary ([`Action`], [`Step`], [`StepResult`])
//! - Classified backend errors carrying the backend's numeric code
//! - Zstandard encoder/decoder backends with memory-limit enforcement
//! - Named compression presets
//!
//! # Architecture
//!
//! A backend never owns threads or queues. The engine hands it an input
//! slice and a fixed-size output buffer; the backend reports how much of
//! each it used and whether the stream ended.

mod backend;
mod error;
mod options;
mod presets;
mod zstd_codec;

pub use backend::{Action, CodecBackend, Step, StepResult};
pub use error::{BackendError, CodecError, CodecResult, ErrorKind, ENGINE_STALL_CODE};
pub use options::{window_log_for_limit, Check, DecoderFlags, DecoderOptions, EncoderOptions};
pub use presets::{preset, Preset, PRESETS, PRESET_DEFAULT};
pub use zstd_codec::{is_zstd_frame, ZstdDecoder, ZstdEncoder};
