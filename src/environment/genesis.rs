//! Genesis timing.
//!
//! Every node is told the same absolute genesis instant, computed once when
//! bootstrap deployment starts. Nodes come up at different times, so after
//! the last group is ready the coordinator sleeps whatever is left of the
//! delay.

use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use tokio::time::Instant;
use tracing::info;

use crate::environment::error::{Error, Result};

/// Genesis instant of one run
#[derive(Debug, PartialEq, Eq)]
pub struct GenesisSchedule {
    pub delta: Duration,
    /// Monotonic reference point for the remaining wait.
    pub computed_at: Instant,
    /// Wall-clock genesis passed to the nodes.
    pub genesis_time: Timestamp,
}

impl GenesisSchedule {
    /// Schedule genesis `delta` from now.
    pub fn start(delta: Duration) -> Result<Self> {
        Self::at(delta, Instant::now(), Timestamp::now())
    }

    pub fn at(delta: Duration, computed_at: Instant, now: Timestamp) -> Result<Self> {
        let offset = SignedDuration::try_from(delta)
            .map_err(|e| Error::config(format!("genesis delta {delta:?}: {e}")))?;
        let genesis_time = now
            .checked_add(offset)
            .map_err(|e| Error::config(format!("genesis delta {delta:?}: {e}")))?;
        Ok(Self {
            delta,
            computed_at,
            genesis_time,
        })
    }

    /// Genesis time as passed on the node command line.
    pub fn genesis_arg(&self) -> String {
        self.genesis_time.to_string()
    }

    pub fn elapsed(&self) -> Duration {
        self.computed_at.elapsed()
    }
}

/// Remaining genesis wait, never negative.
pub fn remaining(delta: Duration, elapsed: Duration) -> Duration {
    delta.saturating_sub(elapsed)
}

/// Sleeps out the rest of the genesis delay
#[derive(Debug, Default, Clone, Copy)]
pub struct GenesisSynchronizer;

impl GenesisSynchronizer {
    /// Sleep `max(0, delta - elapsed)` and return the slept duration.
    pub async fn await_genesis(&self, delta: Duration, elapsed: Duration) -> Duration {
        let wait = remaining(delta, elapsed);
        info!(
            delta_secs = delta.as_secs(),
            elapsed_ms = elapsed.as_millis() as u64,
            wait_ms = wait.as_millis() as u64,
            "Waiting for genesis"
        );
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Wait out `schedule`, consuming it.
    pub async fn await_schedule(&self, schedule: GenesisSchedule) -> Duration {
        let elapsed = schedule.elapsed();
        self.await_genesis(schedule.delta, elapsed).await
    }
}
