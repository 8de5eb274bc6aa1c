//! Stream state machine
//!
//! ```text
//!            begin                 end(StreamEnd)
//!   Ready ──────────▶ Running ──────────────────▶ Finished ─┐
//!     ▲                │  │     end(Error)                  │
//!     │     pause      │  └───────────────────▶ Errored ──┤
//!     └────────────────┘                                   │
//!     ▲                         reset                      │
//!     └────────────────────────────────────────────────────┘
//! ```
//!
//! `reset` is the only way out of `Finished` and `Errored`. It runs
//! after the terminal notification has been delivered.

use brook_codec::BackendError;

use crate::message::Terminal;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamState {
    /// No driver active; submissions start one
    #[default]
    Ready,
    /// A drive loop (inline or worker) owns the stream
    Running,
    /// Stream ended; terminal notification awaits delivery
    Finished,
    /// Backend failed; terminal notification awaits delivery
    Errored(BackendError),
}

impl StreamState {
    /// Claim the stream for a driver. False if one is already active or
    /// the stream is waiting to reset.
    pub(crate) fn begin(&mut self) -> bool {
        if *self == StreamState::Ready {
            *self = StreamState::Running;
            true
        } else {
            false
        }
    }

    /// Driver stopped without reaching a terminal result
    pub(crate) fn pause(&mut self) {
        if *self == StreamState::Running {
            *self = StreamState::Ready;
        }
    }

    pub(crate) fn end(&mut self, terminal: &Terminal) {
        if *self != StreamState::Running {
            return;
        }
        *self = match terminal {
            Terminal::StreamEnd => StreamState::Finished,
            Terminal::Error(err) => StreamState::Errored(err.clone()),
        };
    }

    /// Back to `Ready` after a terminal result. False in any other state.
    pub(crate) fn reset(&mut self) -> bool {
        if self.is_terminal() {
            *self = StreamState::Ready;
            true
        } else {
            false
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Finished | StreamState::Errored(_))
    }

    pub fn is_running(&self) -> bool {
        *self == StreamState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_codec::ErrorKind;

    #[test]
    fn test_normal_lifecycle() {
        let mut state = StreamState::default();
        assert!(state.begin());
        assert!(!state.begin());
        assert!(state.is_running());

        state.end(&Terminal::StreamEnd);
        assert_eq!(state, StreamState::Finished);
        assert!(!state.begin());

        assert!(state.reset());
        assert_eq!(state, StreamState::Ready);
    }

    #[test]
    fn test_error_carries_backend_error() {
        let mut state = StreamState::Ready;
        state.begin();
        let err = BackendError::new(ErrorKind::MemoryLimit, 16, "window too large");
        state.end(&Terminal::Error(err.clone()));
        assert_eq!(state, StreamState::Errored(err));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let mut state = StreamState::Ready;
        assert!(!state.reset());
        state.end(&Terminal::StreamEnd);
        assert_eq!(state, StreamState::Ready);

        state.begin();
        state.pause();
        assert_eq!(state, StreamState::Ready);
    }
}
