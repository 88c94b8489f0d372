// crates/resilience/src/timeout.rs
//! Per-attempt deadlines

use crate::error::TimeoutError;
use std::future::Future;
use std::time::Duration;

/// Races `operation` against a timer of `duration`.
///
/// When the timer fires first the operation future is dropped and its result
/// discarded.
pub async fn with_timeout<Fut>(
    duration: Duration,
    operation: Fut,
) -> Result<Fut::Output, TimeoutError>
where
    Fut: Future,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| TimeoutError { after: duration })
}
