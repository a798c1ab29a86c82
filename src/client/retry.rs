//! # Optimistic Retry
//!
//! Generic retry loop for read-modify-write operations guarded by resourceVersion.

use super::ClientError;
use std::future::Future;
use tracing::debug;

/// Run `op` until it succeeds, fails with a non-conflict error, or `max_attempts` is reached
///
/// `op` receives the zero-based attempt number and is expected to re-read the object
/// on attempts after the first.
///
/// # Errors
///
/// Returns the last error from `op`.
pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, ClientError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Err(e) if e.is_conflict() && attempt + 1 < max_attempts => {
                debug!(attempt, error = %e, "write conflicted, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}
