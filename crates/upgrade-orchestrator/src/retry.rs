//! Bounded retry of collaborator calls
//!
//! Transient [`ClientError`]s are retried with Fibonacci backoff until the
//! attempt budget runs out. Permanent errors return immediately. The backoff
//! sleep is abandoned as soon as the cancellation token fires.

use crate::backoff::FibonacciBackoff;
use crate::config::RetryConfig;
use cluster_client::ClientError;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError {
    /// Last error after a permanent failure or an exhausted budget
    Failed { source: ClientError, attempts: u32 },
    /// Cancellation fired before the operation succeeded
    Cancelled { attempts: u32 },
}

impl RetryError {
    /// Attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or exhausts `config.max_attempts`
///
/// Returns the value together with the number of attempts it took.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<(T, u32), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut backoff = FibonacciBackoff::new(config.min_delay, config.max_delay);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if !e.is_transient() => {
                error!(operation = %operation_name, attempt, error = %e, "Operation failed permanently");
                return Err(RetryError::Failed { source: e, attempts: attempt });
            }
            Err(e) if attempt >= config.max_attempts => {
                error!(operation = %operation_name, attempt, error = %e, "Operation failed after max retries");
                return Err(RetryError::Failed { source: e, attempts: attempt });
            }
            Err(e) => {
                let delay = backoff.next_backoff();
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
