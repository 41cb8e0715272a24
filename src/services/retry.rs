use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::warn;

use crate::{config::RetryConfig, dao::storage::StorageResult};

/// Run an idempotent store call, retrying transient failures with exponential backoff.
///
/// Only reads and writes guarded by a duplicate check may go through here.
pub async fn with_retry<F, Fut, T>(policy: &RetryConfig, operation: &'static str, mut call: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut delay = Duration::from_millis(policy.initial_delay_ms);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(operation, attempt, error = %err, "store call failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
