//! Record of a single downstream invocation.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// How one invocation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Timeout => "timeout",
        }
    }

    /// Timeouts count against the breaker like any other failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, AttemptOutcome::Success)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral record of one invocation, folded into the breaker and then dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallAttempt {
    /// 1-indexed attempt number within one guarded call.
    pub number: u32,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

impl CallAttempt {
    /// `finished_at` must come from the same clock as `started_at`.
    pub fn new(
        number: u32,
        started_at: Instant,
        finished_at: Instant,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            number,
            started_at,
            outcome,
            latency: finished_at.saturating_duration_since(started_at),
        }
    }
}
