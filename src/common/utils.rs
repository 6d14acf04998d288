//! Utility functions for sessionkv

use std::future::Future;
use std::time::Duration;

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run a node operation under a deadline.
///
/// Expiry is reported as [`crate::Error::Timeout`], which callers treat as a
/// retryable command failure.
pub async fn with_deadline<F, T>(deadline: Duration, what: &str, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(crate::Error::Timeout(format!(
            "{} exceeded {}ms",
            what,
            deadline.as_millis()
        ))),
    }
}
