//! Relay connection state machine.
//!
//! Pure transition logic with no I/O. The connection task feeds it inputs
//! as things happen on the socket and performs whatever effect it returns.
//!
//! ```text
//!            open                 handshake ok
//!   Idle ─────────────> Connecting ───────────> Open
//!    ^                   ^    │                   │
//!    │      retry elapsed│    │handshake failed   │dropped
//!    │                   │    v                   │
//!    │            ClosedPendingRetry <────────────┘
//!    │                   │
//!    └───────────────────┘ close (from any state) or attempts exhausted
//! ```

use std::fmt;
use std::time::Duration;

/// Default delay before reconnecting a dropped channel.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Lifecycle state of a relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    ClosedPendingRetry,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosedPendingRetry => "closed_pending_retry",
        };
        f.write_str(name)
    }
}

/// When and how often a dropped channel is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay before each reconnect
    pub backoff: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RECONNECT_BACKOFF,
            max_attempts: None,
        }
    }
}

/// Something that happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmInput {
    /// Caller asked to open
    Open,
    /// WebSocket handshake completed
    HandshakeSucceeded,
    /// Handshake failed or an open channel closed involuntarily
    Dropped,
    /// Backoff timer fired
    RetryElapsed,
    /// Caller asked to close
    Close,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmEffect {
    /// Start a handshake
    Connect,
    /// Sleep for `delay`, then feed `RetryElapsed`
    ScheduleRetry { attempt: u32, delay: Duration },
    /// Stop; the attempt budget is spent
    GiveUp { attempts: u32 },
    /// Tear down the socket and cancel any pending retry
    Cancel,
}

/// Connection state plus the consecutive-retry counter.
#[derive(Debug, Clone)]
pub struct ConnectionFsm {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ConnectionFsm {
    /// New machine in `Idle`
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            attempts: 0,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled since the last successful handshake
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Apply an input. Inputs that do not apply to the current state are
    /// ignored and return `None`.
    pub fn handle(&mut self, input: FsmInput) -> Option<FsmEffect> {
        use ConnectionState as S;

        match (self.state, input) {
            (S::Idle, FsmInput::Open) => {
                self.attempts = 0;
                self.state = S::Connecting;
                Some(FsmEffect::Connect)
            }
            (S::Connecting, FsmInput::HandshakeSucceeded) => {
                self.attempts = 0;
                self.state = S::Open;
                None
            }
            (S::Connecting | S::Open, FsmInput::Dropped) => {
                if self
                    .policy
                    .max_attempts
                    .is_some_and(|max| self.attempts >= max)
                {
                    self.state = S::Idle;
                    return Some(FsmEffect::GiveUp {
                        attempts: self.attempts,
                    });
                }
                self.attempts += 1;
                self.state = S::ClosedPendingRetry;
                Some(FsmEffect::ScheduleRetry {
                    attempt: self.attempts,
                    delay: self.policy.backoff,
                })
            }
            (S::ClosedPendingRetry, FsmInput::RetryElapsed) => {
                self.state = S::Connecting;
                Some(FsmEffect::Connect)
            }
            (S::Connecting | S::Open | S::ClosedPendingRetry, FsmInput::Close) => {
                self.state = S::Idle;
                Some(FsmEffect::Cancel)
            }
            _ => None,
        }
    }
}
