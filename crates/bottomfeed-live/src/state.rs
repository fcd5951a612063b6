//! Reconnect state machine for the live feed.
//!
//! [`FeedMachine`] is pure: it consumes [`FeedInput`]s and returns the
//! [`FeedEffect`] the driver must carry out. It never touches the transport or
//! the clock itself, which keeps every transition unit-testable.
//!
//! ```text
//! start(unsupported) ───────────────────────────────► Fallback (terminal)
//! start ──► Connecting ──Opened/PayloadAccepted──► Streaming
//! Connecting | Streaming ──Failed, failures < max──► BackoffWait
//! Connecting | Streaming ──Failed, failures == max─► Fallback
//! BackoffWait ──RetryElapsed──► Connecting (new generation)
//! ```

use std::{fmt, time::Duration};

use crate::reconnect::BackoffPolicy;

/// Identifies one transport handle. Every reconnect gets a fresh generation.
pub type Generation = u64;

/// Connection state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedState {
    /// A transport handle exists and has not opened yet.
    Connecting,
    /// The transport is open and delivering events.
    Streaming,
    /// No transport handle; a single retry timer is pending.
    BackoffWait {
        /// Consecutive failures that led here.
        attempt: u32,
        /// Delay of the pending retry timer.
        delay: Duration,
    },
    /// Streaming abandoned for the rest of this connection's lifetime.
    Fallback,
}

impl FeedState {
    /// Returns `true` while the live channel is in use or being retried.
    pub fn is_streaming_mode(&self) -> bool {
        !self.is_fallback()
    }

    /// Returns `true` once the connection has degraded to polling.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::BackoffWait { attempt, .. } => write!(f, "BackoffWait({attempt})"),
            Self::Fallback => write!(f, "Fallback"),
        }
    }
}

/// Something that happened to a transport handle or the retry timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedInput {
    /// The handle reported a successful open.
    Opened(Generation),
    /// A content payload from the handle parsed successfully.
    PayloadAccepted(Generation),
    /// The handle reported an error (or its stream ended).
    Failed(Generation),
    /// The pending retry timer fired.
    RetryElapsed,
}

/// What the driver must do after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedEffect {
    /// Open a new transport handle tagged with `generation`.
    Connect {
        /// Generation of the new handle.
        generation: Generation,
    },
    /// Close the current handle and arm the retry timer.
    Retry {
        /// Delay before the retry fires.
        delay: Duration,
    },
    /// Close the current handle and switch to polling for good.
    Fallback,
    /// Nothing to do.
    Nothing,
}

/// Consecutive-failure counting, backoff selection and terminal fallback.
#[derive(Clone, Debug)]
pub struct FeedMachine {
    state: FeedState,
    failures: u32,
    max_failures: u32,
    generation: Generation,
    backoff: BackoffPolicy,
}

impl FeedMachine {
    /// Create a machine that falls back after `max_failures` consecutive
    /// failures, waiting between attempts according to `backoff`.
    pub fn new(max_failures: u32, backoff: BackoffPolicy) -> Self {
        Self {
            state: FeedState::Connecting,
            failures: 0,
            max_failures: max_failures.max(1),
            generation: 0,
            backoff,
        }
    }

    /// Current state.
    pub fn state(&self) -> &FeedState {
        &self.state
    }

    /// Consecutive failures since the last sign of health.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Generation of the current (or most recent) transport handle.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// First transition. Without transport support the machine goes straight
    /// to [`FeedState::Fallback`] and no handle is ever requested.
    pub fn start(&mut self, transport_supported: bool) -> FeedEffect {
        if !transport_supported {
            self.state = FeedState::Fallback;
            return FeedEffect::Fallback;
        }
        self.connect()
    }

    /// Apply one input.
    pub fn handle(&mut self, input: FeedInput) -> FeedEffect {
        if self.state.is_fallback() {
            return FeedEffect::Nothing;
        }

        match input {
            FeedInput::Opened(generation) | FeedInput::PayloadAccepted(generation) => {
                if !self.is_live(generation) {
                    return FeedEffect::Nothing;
                }
                self.failures = 0;
                self.state = FeedState::Streaming;
                FeedEffect::Nothing
            }
            FeedInput::Failed(generation) => {
                if !self.is_live(generation) {
                    return FeedEffect::Nothing;
                }
                self.failures = (self.failures + 1).min(self.max_failures);
                if self.failures >= self.max_failures {
                    self.state = FeedState::Fallback;
                    return FeedEffect::Fallback;
                }
                let delay = self.backoff.delay_for(self.failures);
                self.state = FeedState::BackoffWait {
                    attempt: self.failures,
                    delay,
                };
                FeedEffect::Retry { delay }
            }
            FeedInput::RetryElapsed => match self.state {
                FeedState::BackoffWait { .. } => self.connect(),
                _ => FeedEffect::Nothing,
            },
        }
    }

    fn connect(&mut self) -> FeedEffect {
        self.generation += 1;
        self.state = FeedState::Connecting;
        FeedEffect::Connect {
            generation: self.generation,
        }
    }

    /// Events only count while they come from the current handle and that
    /// handle has not already been given up on.
    fn is_live(&self, generation: Generation) -> bool {
        generation == self.generation
            && matches!(self.state, FeedState::Connecting | FeedState::Streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> FeedMachine {
        FeedMachine::new(5, BackoffPolicy::default())
    }

    /// Fail the current handle and immediately reconnect.
    fn fail_and_reconnect(m: &mut FeedMachine) {
        let effect = m.handle(FeedInput::Failed(m.generation()));
        assert!(matches!(effect, FeedEffect::Retry { .. }), "got {effect:?}");
        let effect = m.handle(FeedInput::RetryElapsed);
        assert!(matches!(effect, FeedEffect::Connect { .. }), "got {effect:?}");
    }

    #[test]
    fn test_start_connects_with_first_generation() {
        let mut m = machine();
        assert_eq!(m.start(true), FeedEffect::Connect { generation: 1 });
        assert_eq!(m.state(), &FeedState::Connecting);
        assert_eq!(m.failures(), 0);
    }

    #[test]
    fn test_start_without_transport_is_fallback() {
        let mut m = machine();
        assert_eq!(m.start(false), FeedEffect::Fallback);
        assert!(m.state().is_fallback());
        assert_eq!(m.generation(), 0);
    }

    #[test]
    fn test_open_moves_to_streaming() {
        let mut m = machine();
        m.start(true);
        assert_eq!(m.handle(FeedInput::Opened(1)), FeedEffect::Nothing);
        assert_eq!(m.state(), &FeedState::Streaming);
    }

    #[test]
    fn test_first_failure_uses_short_delay() {
        let mut m = machine();
        m.start(true);
        assert_eq!(
            m.handle(FeedInput::Failed(1)),
            FeedEffect::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            m.state(),
            &FeedState::BackoffWait {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(m.handle(FeedInput::RetryElapsed), FeedEffect::Connect {
            generation: 2
        });
        assert_eq!(
            m.handle(FeedInput::Failed(2)),
            FeedEffect::Retry {
                delay: Duration::from_secs(20)
            }
        );
    }

    #[test]
    fn test_fifth_failure_falls_back() {
        let mut m = machine();
        m.start(true);
        for _ in 0..4 {
            fail_and_reconnect(&mut m);
            assert!(m.state().is_streaming_mode());
        }
        assert_eq!(m.failures(), 4);
        assert_eq!(
            m.handle(FeedInput::Failed(m.generation())),
            FeedEffect::Fallback
        );
        assert!(m.state().is_fallback());
        assert_eq!(m.failures(), 5);
    }

    #[test]
    fn test_fallback_is_terminal() {
        let mut m = FeedMachine::new(1, BackoffPolicy::default());
        m.start(true);
        assert_eq!(m.handle(FeedInput::Failed(1)), FeedEffect::Fallback);

        let generation = m.generation();
        for input in [
            FeedInput::Opened(generation),
            FeedInput::PayloadAccepted(generation),
            FeedInput::Failed(generation),
            FeedInput::RetryElapsed,
        ] {
            assert_eq!(m.handle(input), FeedEffect::Nothing);
            assert!(m.state().is_fallback());
        }
        assert_eq!(m.failures(), 1);
    }

    #[test]
    fn test_open_resets_failures() {
        let mut m = machine();
        m.start(true);
        fail_and_reconnect(&mut m);
        fail_and_reconnect(&mut m);
        m.handle(FeedInput::Opened(m.generation()));
        assert_eq!(m.failures(), 0);
        for _ in 0..4 {
            fail_and_reconnect(&mut m);
        }
        assert!(m.state().is_streaming_mode());
        assert_eq!(m.failures(), 4);
    }

    #[test]
    fn test_payload_resets_failures_and_delay_burst() {
        let mut m = machine();
        m.start(true);
        fail_and_reconnect(&mut m);
        fail_and_reconnect(&mut m);
        m.handle(FeedInput::PayloadAccepted(m.generation()));
        assert_eq!(m.failures(), 0);
        assert_eq!(m.state(), &FeedState::Streaming);

        // A new burst starts with the short delay again.
        assert_eq!(
            m.handle(FeedInput::Failed(m.generation())),
            FeedEffect::Retry {
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut m = machine();
        m.start(true);
        fail_and_reconnect(&mut m);
        assert_eq!(m.generation(), 2);

        // Late events from handle 1.
        assert_eq!(m.handle(FeedInput::Failed(1)), FeedEffect::Nothing);
        assert_eq!(m.handle(FeedInput::Opened(1)), FeedEffect::Nothing);
        assert_eq!(m.failures(), 1);
        assert_eq!(m.state(), &FeedState::Connecting);
    }

    #[test]
    fn test_error_during_backoff_is_ignored() {
        let mut m = machine();
        m.start(true);
        m.handle(FeedInput::Failed(1));
        // The failed handle is already closed; a duplicate error must not count.
        assert_eq!(m.handle(FeedInput::Failed(1)), FeedEffect::Nothing);
        assert_eq!(m.failures(), 1);
    }

    #[test]
    fn test_spurious_retry_elapsed_is_ignored() {
        let mut m = machine();
        m.start(true);
        assert_eq!(m.handle(FeedInput::RetryElapsed), FeedEffect::Nothing);
        assert_eq!(m.generation(), 1);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let mut m = FeedMachine::new(0, BackoffPolicy::default());
        m.start(true);
        assert_eq!(m.handle(FeedInput::Failed(1)), FeedEffect::Fallback);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FeedState::Connecting.to_string(), "Connecting");
        assert_eq!(FeedState::Streaming.to_string(), "Streaming");
        assert_eq!(
            FeedState::BackoffWait {
                attempt: 2,
                delay: Duration::from_secs(20)
            }
            .to_string(),
            "BackoffWait(2)"
        );
        assert_eq!(FeedState::Fallback.to_string(), "Fallback");
    }
}
