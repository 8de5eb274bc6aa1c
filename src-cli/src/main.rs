//! Brook CLI
//!
//! Streams a file (or stdin) through a compressing or decompressing engine.
//! The host loop runs on the main thread; output is written from the
//! notification handler as data batches arrive.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use brook_core::{
    preset, BrookConfig, DecoderFlags, DecoderOptions, DriveMode, EncoderOptions, EngineError,
    HostLoop, Input, Notification, StreamControl, StreamEngine, Terminal, UsageError,
    ZstdDecoder, ZstdEncoder, PRESETS, PRESET_DEFAULT,
};
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const POLL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[clap(name = "brook")]
#[clap(about = "Stream data through a zstd encoder or decoder", long_about = None)]
struct Cli {
    /// Log engine activity (repeat for more detail)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON config file for engine and host settings
    #[clap(long, global = true, env = "BROOK_CONFIG")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress INPUT (or stdin)
    Compress {
        #[clap(flatten)]
        io: IoArgs,

        /// Compression level
        #[clap(short, long, conflicts_with = "preset")]
        level: Option<i32>,

        /// Named compression preset (see `brook presets`)
        #[clap(short, long)]
        preset: Option<String>,

        /// Window size as a power of two
        #[clap(long)]
        window_log: Option<u32>,
    },

    /// Decompress INPUT (or stdin)
    Decompress {
        #[clap(flatten)]
        io: IoArgs,

        /// Decoder memory limit, e.g. 64M or 1G
        #[clap(long, value_parser = parse_size)]
        memlimit: Option<u64>,

        /// Decode every frame until input ends, not just the first
        #[clap(long)]
        concatenated: bool,
    },

    /// List the built-in compression presets
    Presets,

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Input file; stdin when omitted
    input: Option<PathBuf>,

    /// Output file; stdout when omitted
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Drive the engine on the calling thread instead of a worker
    #[clap(long)]
    sync: bool,
}

/// What the handler has seen so far
#[derive(Default)]
struct Sink {
    /// Output bytes written
    written: u64,
    /// Input chunks acknowledged through `Progress`
    chunks: u64,
    terminal: Option<Terminal>,
    error: Option<io::Error>,
}

impl Sink {
    fn summary(&self) -> String {
        format!("{} input chunks, {} bytes written", self.chunks, self.written)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => BrookConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BrookConfig::default(),
    };

    match cli.command {
        Command::Compress {
            io,
            level,
            preset: name,
            window_log,
        } => {
            let level = match (level, name) {
                (Some(level), _) => level,
                (None, Some(name)) => preset(&name)
                    .map(|p| p.level)
                    .ok_or_else(|| anyhow!("unknown preset '{}'", name))?,
                (None, None) => PRESET_DEFAULT.level,
            };
            let options = EncoderOptions {
                window_log,
                ..EncoderOptions::with_level(level)
            };
            let encoder = ZstdEncoder::new(options).context("creating encoder")?;
            let engine = StreamEngine::with_config(encoder, config.engine.clone())?;
            run_stream(engine, &config, &io)
        }
        Command::Decompress {
            io,
            memlimit,
            concatenated,
        } => {
            let options = DecoderOptions {
                memlimit,
                flags: DecoderFlags { concatenated },
            };
            let decoder = ZstdDecoder::new(options).context("creating decoder")?;
            let engine = StreamEngine::with_config(decoder, config.engine.clone())?;
            run_stream(engine, &config, &io)
        }
        Command::Presets => {
            for p in PRESETS {
                println!("{:<10} level {}", p.name, p.level);
            }
            Ok(())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "brook=warn,brook_core=warn",
        1 => "brook=info,brook_core=info",
        2 => "brook=debug,brook_core=debug",
        _ => "brook=trace,brook_core=trace,brook_codec=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

/// Pump the input through `engine`, writing output as it is delivered
fn run_stream(engine: StreamEngine, config: &BrookConfig, args: &IoArgs) -> Result<()> {
    let started = Instant::now();
    let mut input = open_input(args.input.as_deref())?;
    let output = Arc::new(Mutex::new(open_output(args.output.as_deref())?));
    let sink = Arc::new(Mutex::new(Sink::default()));

    let mut host = HostLoop::with_config(config.host.clone());
    host.attach(&engine);
    let mode = if args.sync {
        DriveMode::Sync
    } else {
        host.preferred_mode(false)
    };
    debug!(stream = engine.id(), ?mode, "Starting stream");

    {
        let output = Arc::clone(&output);
        let sink = Arc::clone(&sink);
        engine.set_handler(move |n: Notification| {
            let mut sink = sink.lock();
            match n {
                Notification::Data(chunk) => {
                    if sink.error.is_some() {
                        return;
                    }
                    match output.lock().write_all(&chunk) {
                        Ok(()) => sink.written += chunk.len() as u64,
                        Err(e) => sink.error = Some(e),
                    }
                }
                Notification::Progress(n) => sink.chunks += n as u64,
                Notification::Terminal(terminal) => sink.terminal = Some(terminal),
            }
        });
    }

    let finished = || sink.lock().terminal.is_some();
    let mut buf = vec![0u8; config.host.input_chunk_size];
    loop {
        if finished() {
            // Backend stopped early; the rest of the input is never read
            break;
        }
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading input"),
        };
        match engine.submit(Input::from(&buf[..n]), mode) {
            Ok(()) => {}
            Err(EngineError::Usage(UsageError::TerminalPending)) => break,
            Err(e) => return Err(e.into()),
        }
        host.run_until_idle()?;
    }

    if !finished() {
        match engine.submit(Input::End, mode) {
            Ok(()) | Err(EngineError::Usage(UsageError::TerminalPending)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    host.run_until(|| finished(), POLL)?;
    drop(engine);

    output.lock().flush().context("flushing output")?;

    let mut sink = sink.lock();
    if let Some(e) = sink.error.take() {
        return Err(e).context("writing output");
    }
    match sink.terminal.take() {
        Some(Terminal::StreamEnd) => {
            info!(
                chunks = sink.chunks,
                written = sink.written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stream complete"
            );
            Ok(())
        }
        Some(Terminal::Error(err)) => {
            warn!(code = err.code, "Stream failed after {}", sink.summary());
            bail!("{}", err)
        }
        None => bail!("stream stopped before reaching its end"),
    }
}

/// Parse a byte count with an optional K/M/G suffix (powers of 1024)
fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                _ => return Err(format!("unknown size suffix '{}'", c)),
            };
            (&s[..i], shift)
        }
        _ => (s, 0),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}'", s))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size '{}' is too large", s))
}
