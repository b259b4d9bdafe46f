//! Bounded polling for external readiness conditions.
//!
//! Every readiness wait in the lifecycle (logging stack, node pool, log
//! collector daemon, bootstrap pods, bootstrap log phrase, client pods) goes
//! through [`poll_until`]: check, sleep a fixed interval, repeat until the
//! check yields a value or the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::environment::error::{Error, Result};

/// Default interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timeout and interval for one bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Poll `check` until it yields `Some(value)` or `config.timeout` elapses.
///
/// Returns `Error::ReadinessTimeout` naming `what` on deadline. Retryable
/// errors from `check` are logged and the poll continues; any other error
/// ends the poll immediately. The condition is always checked once more at
/// the deadline, so a zero timeout still performs a single check.
pub async fn poll_until<T, F, Fut>(what: &str, config: PollConfig, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match check().await {
            Ok(Some(value)) => {
                debug!(
                    what = %what,
                    attempt = attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Condition satisfied"
                );
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                warn!(what = %what, attempt = attempt, error = %e, "Check failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(Error::ReadinessTimeout {
                what: what.to_string(),
                timeout: config.timeout,
            });
        }

        // Never sleep past the deadline
        let remaining = config.timeout.saturating_sub(elapsed);
        sleep(config.interval.min(remaining)).await;
    }
}
