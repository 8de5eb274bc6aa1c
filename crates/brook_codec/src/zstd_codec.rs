//! Zstandard Backend
//!
//! Wraps the `zstd_safe` streaming contexts so they can be driven one step
//! at a time by the engine. Each step maps onto a single
//! `compress_stream2` / `decompress_stream` call.
//!
//! # Memory limits
//!
//! zstd has no direct byte budget for decoders. The dominant cost is the
//! window buffer, so a memory limit is translated into the largest window
//! log that fits (`WindowLogMax`). Frames that declare a bigger window fail
//! with [`ErrorKind::MemoryLimit`] before any large allocation happens.

use tracing::{debug, warn};
use zstd::zstd_safe::zstd_sys::ZSTD_EndDirective;
use zstd::zstd_safe::{self, CCtx, CParameter, DCtx, DParameter, InBuffer, OutBuffer, ResetDirective};

use crate::backend::{Action, CodecBackend, Step};
use crate::error::{BackendError, CodecError, CodecResult, ErrorKind};
use crate::options::{window_log_for_limit, Check, DecoderOptions, EncoderOptions};

/// Frame magic number, little-endian on the wire
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// `ZSTD_error_srcSize_wrong`, reused for input that ends mid-frame
const TRUNCATED_CODE: u32 = 72;

/// Check whether `bytes` starts with a zstd frame header
pub fn is_zstd_frame(bytes: &[u8]) -> bool {
    bytes.len() >= ZSTD_MAGIC.len() && bytes[..ZSTD_MAGIC.len()] == ZSTD_MAGIC
}

/// Convert a zstd function result into a classified [`BackendError`]
fn map_error_code(code: usize) -> BackendError {
    let name = zstd_safe::get_error_name(code);
    // zstd encodes errors as (size_t)-ZSTD_ErrorCode
    let raw = 0usize.wrapping_sub(code) as u32;

    let kind = match raw {
        10 | 12 | 14 => ErrorKind::Format,
        16 => ErrorKind::MemoryLimit,
        20 | 24 | 30 | 32 => ErrorKind::Data,
        22 => ErrorKind::Checksum,
        40..=42 => ErrorKind::Options,
        64 | 66 => ErrorKind::Memory,
        72 => ErrorKind::Truncated,
        _ => ErrorKind::Internal,
    };

    BackendError::new(kind, raw, name)
}

fn allocation_failed(what: &str) -> CodecError {
    CodecError::Backend(BackendError::new(
        ErrorKind::Memory,
        64,
        format!("failed to allocate {}", what),
    ))
}

/// Streaming zstd compressor
pub struct ZstdEncoder {
    context: CCtx<'static>,
    options: EncoderOptions,
    total_in: u64,
    total_out: u64,
}

impl ZstdEncoder {
    /// Create an encoder (`initEncoder(preset, check)`)
    pub fn new(options: EncoderOptions) -> CodecResult<Self> {
        options.validate()?;

        let levels = zstd::compression_level_range();
        if !levels.contains(&options.level) {
            return Err(CodecError::InvalidOption(format!(
                "compression level {} outside {}..={}",
                options.level,
                levels.start(),
                levels.end()
            )));
        }

        let mut context = CCtx::try_create().ok_or_else(|| allocation_failed("compression context"))?;

        context
            .set_parameter(CParameter::CompressionLevel(options.level))
            .map_err(map_error_code)?;
        context
            .set_parameter(CParameter::ChecksumFlag(options.check == Check::Xxh64))
            .map_err(map_error_code)?;
        if let Some(log) = options.window_log {
            context
                .set_parameter(CParameter::WindowLog(log))
                .map_err(map_error_code)?;
        }

        debug!(level = options.level, check = ?options.check, "zstd encoder ready");

        Ok(Self {
            context,
            options,
            total_in: 0,
            total_out: 0,
        })
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }
}

impl CodecBackend for ZstdEncoder {
    fn step(&mut self, input: &[u8], output: &mut [u8], action: Action) -> Step {
        let mut in_buf = InBuffer::around(input);
        let mut out_buf = OutBuffer::around(output);

        let directive = match action {
            Action::Run => ZSTD_EndDirective::ZSTD_e_continue,
            Action::Finish => ZSTD_EndDirective::ZSTD_e_end,
        };

        let result = self
            .context
            .compress_stream2(&mut out_buf, &mut in_buf, directive);

        let consumed = in_buf.pos();
        let produced = out_buf.pos();
        self.total_in += consumed as u64;
        self.total_out += produced as u64;

        match result {
            Ok(0) if action == Action::Finish => Step::stream_end(consumed, produced),
            Ok(_) => Step::ok(consumed, produced),
            Err(code) => Step::error(consumed, produced, map_error_code(code)),
        }
    }

    fn reset(&mut self) {
        if let Err(code) = self.context.reset(ResetDirective::SessionOnly) {
            warn!("zstd encoder reset failed: {}", zstd_safe::get_error_name(code));
        }
        self.total_in = 0;
        self.total_out = 0;
    }

    fn memory_usage(&self) -> Option<u64> {
        Some(self.context.sizeof() as u64)
    }

    fn total_in(&self) -> u64 {
        self.total_in
    }

    fn total_out(&self) -> u64 {
        self.total_out
    }

    fn name(&self) -> &'static str {
        "zstd-encoder"
    }
}

/// Streaming zstd decompressor
pub struct ZstdDecoder {
    context: DCtx<'static>,
    options: DecoderOptions,
    total_in: u64,
    total_out: u64,
    /// Last call completed a frame and nothing has been read since
    at_frame_boundary: bool,
}

impl ZstdDecoder {
    /// Create a decoder (`initDecoder(memlimit, flags)`)
    pub fn new(options: DecoderOptions) -> CodecResult<Self> {
        let mut context = DCtx::try_create().ok_or_else(|| allocation_failed("decompression context"))?;

        if let Some(limit) = options.memlimit {
            context
                .set_parameter(DParameter::WindowLogMax(window_log_for_limit(limit)))
                .map_err(map_error_code)?;
        }

        debug!(memlimit = ?options.memlimit, concatenated = options.flags.concatenated, "zstd decoder ready");

        Ok(Self {
            context,
            options,
            total_in: 0,
            total_out: 0,
            at_frame_boundary: false,
        })
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }
}

impl CodecBackend for ZstdDecoder {
    fn step(&mut self, input: &[u8], output: &mut [u8], action: Action) -> Step {
        let input_len = input.len();
        let mut in_buf = InBuffer::around(input);
        let mut out_buf = OutBuffer::around(output);

        let result = self.context.decompress_stream(&mut out_buf, &mut in_buf);

        let consumed = in_buf.pos();
        let produced = out_buf.pos();
        self.total_in += consumed as u64;
        self.total_out += produced as u64;

        if consumed > 0 {
            self.at_frame_boundary = false;
        }

        match result {
            Err(code) => Step::error(consumed, produced, map_error_code(code)),
            Ok(0) => {
                self.at_frame_boundary = true;
                let input_done = consumed == input_len;
                if !self.options.flags.concatenated || (input_done && action == Action::Finish) {
                    Step::stream_end(consumed, produced)
                } else {
                    Step::ok(consumed, produced)
                }
            }
            Ok(_) => {
                let stuck = consumed == 0 && produced == 0 && input_len == 0;
                if action == Action::Finish && stuck {
                    if self.at_frame_boundary {
                        // Concatenated mode: input ended cleanly between frames
                        return Step::stream_end(0, 0);
                    }
                    return Step::error(
                        0,
                        0,
                        BackendError::new(
                            ErrorKind::Truncated,
                            TRUNCATED_CODE,
                            "input ended before the end of the frame",
                        ),
                    );
                }
                Step::ok(consumed, produced)
            }
        }
    }

    fn reset(&mut self) {
        if let Err(code) = self.context.reset(ResetDirective::SessionOnly) {
            warn!("zstd decoder reset failed: {}", zstd_safe::get_error_name(code));
        }
        self.total_in = 0;
        self.total_out = 0;
        self.at_frame_boundary = false;
    }

    fn memory_usage(&self) -> Option<u64> {
        Some(self.context.sizeof() as u64)
    }

    fn memory_limit(&self) -> Option<u64> {
        self.options.memlimit
    }

    /// Only valid between frames; zstd rejects parameter changes mid-frame
    fn set_memory_limit(&mut self, limit: u64) -> Result<(), CodecError> {
        self.context
            .set_parameter(DParameter::WindowLogMax(window_log_for_limit(limit)))
            .map_err(map_error_code)?;
        self.options.memlimit = Some(limit);
        Ok(())
    }

    fn total_in(&self) -> u64 {
        self.total_in
    }

    fn total_out(&self) -> u64 {
        self.total_out
    }

    fn name(&self) -> &'static str {
        "zstd-decoder"
    }
}
