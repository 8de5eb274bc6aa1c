//! Encoder and Decoder Options

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::presets::PRESET_DEFAULT;

/// Smallest window the zstd format allows (1 KiB)
pub const WINDOW_LOG_MIN: u32 = 10;

/// Largest window this crate will configure (2 GiB)
pub const WINDOW_LOG_MAX: u32 = 31;

/// Integrity check appended to each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Check {
    None,
    #[default]
    Xxh64,
}

/// Options for a new encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// Compression level (see [`crate::Preset`])
    pub level: i32,

    /// Integrity check type
    #[serde(default)]
    pub check: Check,

    /// Explicit window size as a power of two; `None` lets the level decide
    #[serde(default)]
    pub window_log: Option<u32>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            level: PRESET_DEFAULT.level,
            check: Check::default(),
            window_log: None,
        }
    }
}

impl EncoderOptions {
    pub fn with_level(level: i32) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> CodecResult<()> {
        if let Some(log) = self.window_log {
            if !(WINDOW_LOG_MIN..=WINDOW_LOG_MAX).contains(&log) {
                return Err(CodecError::InvalidOption(format!(
                    "window_log {} outside {}..={}",
                    log, WINDOW_LOG_MIN, WINDOW_LOG_MAX
                )));
            }
        }
        Ok(())
    }
}

/// Decoder behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderFlags {
    /// Keep decoding across frame boundaries until input ends
    #[serde(default)]
    pub concatenated: bool,
}

/// Options for a new decoder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderOptions {
    /// Upper bound on decoder memory in bytes; `None` means the format maximum
    #[serde(default)]
    pub memlimit: Option<u64>,

    #[serde(default)]
    pub flags: DecoderFlags,
}

impl DecoderOptions {
    pub fn with_memlimit(memlimit: u64) -> Self {
        Self {
            memlimit: Some(memlimit),
            ..Default::default()
        }
    }
}

/// Translate a byte budget into the largest window log that fits inside it
pub fn window_log_for_limit(limit: u64) -> u32 {
    let log = if limit == 0 { 0 } else { 63 - limit.leading_zeros() };
    log.clamp(WINDOW_LOG_MIN, WINDOW_LOG_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoder_options() {
        let opts = EncoderOptions::default();
        assert_eq!(opts.level, PRESET_DEFAULT.level);
        assert_eq!(opts.check, Check::Xxh64);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_window_log_validation() {
        let opts = EncoderOptions {
            window_log: Some(5),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = EncoderOptions {
            window_log: Some(20),
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_window_log_for_limit() {
        assert_eq!(window_log_for_limit(1 << 20), 20);
        assert_eq!(window_log_for_limit((1 << 20) + 1), 20);
        assert_eq!(window_log_for_limit((1 << 20) - 1), 19);
        // Clamped to the format bounds
        assert_eq!(window_log_for_limit(0), WINDOW_LOG_MIN);
        assert_eq!(window_log_for_limit(16), WINDOW_LOG_MIN);
        assert_eq!(window_log_for_limit(u64::MAX), WINDOW_LOG_MAX);
    }

    #[test]
    fn test_decoder_options_serialization() {
        let opts = DecoderOptions::with_memlimit(1 << 24);
        let json = serde_json::to_string(&opts).unwrap();
        let back: DecoderOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.memlimit, Some(1 << 24));
        assert!(!back.flags.concatenated);

        let sparse: DecoderOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(sparse.memlimit, None);
    }
}
