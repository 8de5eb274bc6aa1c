//! One-shot helpers
//!
//! Run a whole buffer through a synchronous engine and collect the
//! result.

use std::sync::Arc;

use parking_lot::Mutex;

use brook_codec::{DecoderOptions, EncoderOptions};

use crate::control::StreamControl;
use crate::engine::StreamEngine;
use crate::error::{EngineError, EngineResult};
use crate::message::{DriveMode, Input, Notification, Terminal};

#[derive(Default)]
struct Collected {
    output: Vec<u8>,
    terminal: Option<Terminal>,
}

/// Compress `input` into a single zstd frame
pub fn compress(input: &[u8], options: EncoderOptions) -> EngineResult<Vec<u8>> {
    run(StreamEngine::encoder(options)?, input)
}

/// Decompress a complete zstd stream
pub fn decompress(input: &[u8], options: DecoderOptions) -> EngineResult<Vec<u8>> {
    run(StreamEngine::decoder(options)?, input)
}

fn run(engine: StreamEngine, input: &[u8]) -> EngineResult<Vec<u8>> {
    let collected = Arc::new(Mutex::new(Collected::default()));
    let sink = Arc::clone(&collected);
    engine.set_handler(move |n: Notification| {
        let mut sink = sink.lock();
        match n {
            Notification::Data(chunk) => sink.output.extend_from_slice(&chunk),
            Notification::Progress(_) => {}
            Notification::Terminal(terminal) => sink.terminal = Some(terminal),
        }
    });

    if !input.is_empty() {
        engine.submit(Input::from(input), DriveMode::Sync)?;
    }
    engine.submit(Input::End, DriveMode::Sync)?;
    drop(engine);

    let mut collected = collected.lock();
    match collected.terminal.take() {
        Some(Terminal::StreamEnd) => Ok(std::mem::take(&mut collected.output)),
        Some(Terminal::Error(err)) => Err(EngineError::Stream(err)),
        None => Err(EngineError::Incomplete),
    }
}
