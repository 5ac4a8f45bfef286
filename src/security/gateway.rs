//! Per-user admission at the edge.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::observability::{EventSink, LogSink, ResilienceEvent};
use crate::error::ErrorKind;
use crate::security::rate_limit::{Admission, RateLimiter};

/// Outcome of a gateway request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayVerdict {
    Served { user: String },
    TooManyRequests { user: String, retry_after: Duration },
}

impl GatewayVerdict {
    pub fn is_served(&self) -> bool {
        matches!(self, GatewayVerdict::Served { .. })
    }
}

impl fmt::Display for GatewayVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayVerdict::Served { user } => write!(f, "Request served for {user}"),
            GatewayVerdict::TooManyRequests { .. } => {
                f.write_str("Too many requests, please wait.")
            }
        }
    }
}

/// Admits requests per user through a keyed fixed-window limiter.
pub struct Gateway {
    limiter: RateLimiter,
    sink: Arc<dyn EventSink>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.limit, Duration::from_millis(config.window_ms)),
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.limiter = self.limiter.with_clock(clock);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Handle one request from `user`.
    pub fn handle(&self, user: &str) -> GatewayVerdict {
        match self.limiter.try_acquire(user) {
            Admission::Admitted { .. } => GatewayVerdict::Served {
                user: user.to_string(),
            },
            Admission::Rejected { retry_after } => {
                self.sink.on_event(&ResilienceEvent::CallRejected {
                    target: format!("gateway:{user}"),
                    reason: ErrorKind::RateLimited,
                });
                GatewayVerdict::TooManyRequests {
                    user: user.to_string(),
                    retry_after,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_three_per_window_then_throttled() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Gateway::new(&GatewayConfig::default()).with_clock(clock.clone());

        for _ in 0..3 {
            assert!(gateway.handle("alice").is_served());
        }
        let verdict = gateway.handle("alice");
        assert!(!verdict.is_served());
        assert_eq!(verdict.to_string(), "Too many requests, please wait.");
        assert!(gateway.handle("bob").is_served());

        clock.advance(Duration::from_millis(5_000));
        assert_eq!(gateway.handle("alice").to_string(), "Request served for alice");
    }
}
