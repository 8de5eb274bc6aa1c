//! Scripted backends for engine tests

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

use brook_codec::{Action, BackendError, CodecBackend, CodecError, ErrorKind, Step};

use crate::message::Notification;

/// Concatenated payload of every `Data` notification
pub(crate) fn concat_data(events: &[Notification]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|n| match n {
            Notification::Data(chunk) => Some(chunk.as_bytes()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

/// Sum of every `Progress` count
pub(crate) fn progress_total(events: &[Notification]) -> usize {
    events
        .iter()
        .map(|n| match n {
            Notification::Progress(count) => *count,
            _ => 0,
        })
        .sum()
}

/// Identity codec: output is the input. Ends on `Finish` once all input
/// has been copied.
#[derive(Debug, Default)]
pub(crate) struct EchoBackend {
    total_in: u64,
    total_out: u64,
    memlimit: Option<u64>,
}

impl EchoBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn copy(&mut self, input: &[u8], output: &mut [u8], limit: usize) -> usize {
        let n = input.len().min(output.len()).min(limit);
        output[..n].copy_from_slice(&input[..n]);
        self.total_in += n as u64;
        self.total_out += n as u64;
        n
    }
}

impl CodecBackend for EchoBackend {
    fn step(&mut self, input: &[u8], output: &mut [u8], action: Action) -> Step {
        let n = self.copy(input, output, usize::MAX);
        if action == Action::Finish && n == input.len() {
            Step::stream_end(n, n)
        } else {
            Step::ok(n, n)
        }
    }

    fn reset(&mut self) {
        self.total_in = 0;
        self.total_out = 0;
    }

    fn memory_usage(&self) -> Option<u64> {
        Some(64)
    }

    fn memory_limit(&self) -> Option<u64> {
        self.memlimit
    }

    fn set_memory_limit(&mut self, limit: u64) -> Result<(), CodecError> {
        self.memlimit = Some(limit);
        Ok(())
    }

    fn total_in(&self) -> u64 {
        self.total_in
    }

    fn total_out(&self) -> u64 {
        self.total_out
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Echoes the first `fail_after` bytes of a stream, then reports a data error
#[derive(Debug)]
pub(crate) struct FailingBackend {
    echo: EchoBackend,
    fail_after: u64,
}

impl FailingBackend {
    pub(crate) const CODE: u32 = 99;

    pub(crate) fn after(fail_after: u64) -> Self {
        Self {
            echo: EchoBackend::new(),
            fail_after,
        }
    }
}

impl CodecBackend for FailingBackend {
    fn step(&mut self, input: &[u8], output: &mut [u8], _action: Action) -> Step {
        let room = self.fail_after.saturating_sub(self.echo.total_in) as usize;
        if room == 0 {
            return Step::error(
                0,
                0,
                BackendError::new(ErrorKind::Data, Self::CODE, "scripted failure"),
            );
        }
        let n = self.echo.copy(input, output, room);
        Step::ok(n, n)
    }

    fn reset(&mut self) {
        self.echo.reset();
    }

    fn memory_usage(&self) -> Option<u64> {
        None
    }

    fn total_in(&self) -> u64 {
        self.echo.total_in
    }

    fn total_out(&self) -> u64 {
        self.echo.total_out
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Never consumes or produces anything
#[derive(Debug, Default)]
pub(crate) struct StallingBackend;

impl CodecBackend for StallingBackend {
    fn step(&mut self, _input: &[u8], _output: &mut [u8], _action: Action) -> Step {
        Step::ok(0, 0)
    }

    fn reset(&mut self) {}

    fn memory_usage(&self) -> Option<u64> {
        None
    }

    fn total_in(&self) -> u64 {
        0
    }

    fn total_out(&self) -> u64 {
        0
    }

    fn name(&self) -> &'static str {
        "stalling"
    }
}

/// Echo backend whose steps block until the test opens the gate
pub(crate) struct GatedBackend {
    echo: EchoBackend,
    entered: Sender<()>,
    permits: Receiver<()>,
}

/// Test-side controls for a [`GatedBackend`]
pub(crate) struct Gate {
    entered: Receiver<()>,
    permits: Sender<()>,
}

impl GatedBackend {
    pub(crate) fn new() -> (Self, Gate) {
        let (entered_tx, entered_rx) = unbounded();
        let (permit_tx, permit_rx) = unbounded();
        let backend = Self {
            echo: EchoBackend::new(),
            entered: entered_tx,
            permits: permit_rx,
        };
        let gate = Gate {
            entered: entered_rx,
            permits: permit_tx,
        };
        (backend, gate)
    }
}

impl Gate {
    /// Block until a step is waiting at the gate
    pub(crate) fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("no step reached the gate");
    }

    /// Let every current and future step through
    pub(crate) fn open(self) {
        drop(self.permits);
    }
}

impl CodecBackend for GatedBackend {
    fn step(&mut self, input: &[u8], output: &mut [u8], action: Action) -> Step {
        let _ = self.entered.send(());
        // Disconnected means the gate is open
        let _ = self.permits.recv();
        self.echo.step(input, output, action)
    }

    fn reset(&mut self) {
        self.echo.reset();
    }

    fn memory_usage(&self) -> Option<u64> {
        self.echo.memory_usage()
    }

    fn total_in(&self) -> u64 {
        self.echo.total_in
    }

    fn total_out(&self) -> u64 {
        self.echo.total_out
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}
