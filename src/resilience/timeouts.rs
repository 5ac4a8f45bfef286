//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a single attempt with a deadline
//! - Cancel the attempt cleanly on timeout (the future is dropped)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and count as breaker failures

use std::future::Future;
use std::time::Duration;

use crate::error::{ResilienceError, ResilienceResult};

/// Await `call`, failing with [`ResilienceError::Timeout`] once `limit` elapses.
///
/// `None` means no deadline.
pub async fn with_timeout<T, E, Fut>(limit: Option<Duration>, call: Fut) -> ResilienceResult<T, E>
where
    Fut: Future<Output = ResilienceResult<T, E>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ResilienceError::Timeout(limit)),
        },
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result: ResilienceResult<(), ()> = with_timeout(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ResilienceError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let result: ResilienceResult<u32, ()> = with_timeout(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_no_limit() {
        let result: ResilienceResult<u32, ()> = with_timeout(None, async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }
}
