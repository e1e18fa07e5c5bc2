//! Runs reconcile steps: once, or repeatedly until they converge, honouring
//! retry hints.

use std::time::Duration;

use anyhow::{Result, bail};
use snapscan_provider::ProviderError;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Calls before giving up.
    pub max_attempts: u32,
    /// Upper bound for a single wait, whatever the provider suggests.
    pub max_delay: Duration,
}

/// Where a single call left the reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    /// Not converged yet; call again after this long.
    Pending(Duration),
}

/// Call `step` once. Only a fatal answer is an error.
pub async fn step_once<F, Fut>(what: &str, step: F) -> Result<Progress>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = snapscan_provider::Result<()>>,
{
    match step().await {
        Ok(()) => {
            info!("{} done", what);
            Ok(Progress::Done)
        }
        Err(ProviderError::Retryable { after, message }) => {
            info!(?after, reason = %message, "{} not done yet", what);
            Ok(Progress::Pending(after))
        }
        Err(e @ ProviderError::Fatal { .. }) => {
            warn!(error = %e, "{} failed", what);
            bail!("{} failed: {}", what, e.message());
        }
    }
}

/// Run `step` until it returns `Ok`. Returns the number of calls made.
pub async fn drive<F, Fut>(what: &str, policy: RetryPolicy, mut step: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = snapscan_provider::Result<()>>,
{
    for attempt in 1..=policy.max_attempts {
        match step().await {
            Ok(()) => {
                info!(attempt, "{} done", what);
                return Ok(attempt);
            }
            Err(ProviderError::Retryable { after, message }) => {
                let delay = after.min(policy.max_delay);
                info!(attempt, ?delay, reason = %message, "{} not done yet", what);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e @ ProviderError::Fatal { .. }) => {
                warn!(attempt, error = %e, "{} failed", what);
                bail!("{} failed: {}", what, e.message());
            }
        }
    }
    bail!(
        "{} did not converge after {} attempts",
        what,
        policy.max_attempts
    )
}
