//! Test scenarios run against a live environment.
//!
//! A [`Scenario`] is a named async function of an [`Environment`]. Scenarios
//! are grouped into a [`ScenarioSuite`], which shares one environment; both
//! can be marked skipped.

mod liveness;

pub use liveness::{epoch_duration, network_liveness};

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use crate::environment::error::Error as EnvError;
use crate::environment::lifecycle::Environment;

/// Why a scenario failed
#[derive(Error, Debug)]
pub enum ScenarioFailure {
    #[error("check failed: {0}")]
    Check(String),

    #[error(transparent)]
    Environment(#[from] EnvError),
}

impl ScenarioFailure {
    pub fn check(msg: impl Into<String>) -> Self {
        Self::Check(msg.into())
    }
}

type ScenarioFn =
    Box<dyn Fn(Environment) -> BoxFuture<'static, Result<(), ScenarioFailure>> + Send + Sync>;

/// One named test body
pub struct Scenario {
    pub name: String,
    pub skip: bool,
    run: ScenarioFn,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

impl Scenario {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(Environment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ScenarioFailure>> + Send + 'static,
    {
        Self {
            name: name.into(),
            skip: false,
            run: Box::new(move |env| Box::pin(run(env))),
        }
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Run against `env` unless skipped.
    pub async fn execute(&self, env: Environment) -> ScenarioResult {
        if self.skip {
            info!(scenario = %self.name, "Scenario skipped");
            return ScenarioResult {
                name: self.name.clone(),
                outcome: ScenarioOutcome::Skipped,
                elapsed: Duration::ZERO,
            };
        }

        info!(scenario = %self.name, namespace = %env.namespace, "Scenario started");
        let started = Instant::now();
        let outcome = match (self.run)(env).await {
            Ok(()) => ScenarioOutcome::Passed,
            Err(e) => {
                error!(scenario = %self.name, error = %e, "Scenario failed");
                ScenarioOutcome::Failed(e.to_string())
            }
        };
        let elapsed = started.elapsed();
        info!(
            scenario = %self.name,
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scenario finished"
        );
        ScenarioResult {
            name: self.name.clone(),
            outcome,
            elapsed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    Failed(String),
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: ScenarioOutcome,
    pub elapsed: Duration,
}

/// Scenarios sharing one environment
#[derive(Debug, Default)]
pub struct ScenarioSuite {
    pub name: String,
    pub skip: bool,
    pub scenarios: Vec<Scenario>,
}

impl ScenarioSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            skip: false,
            scenarios: Vec::new(),
        }
    }

    pub fn with(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// No scenario would run: the suite is skipped, empty, or every scenario
    /// in it is skipped.
    pub fn is_skipped(&self) -> bool {
        self.skip || self.scenarios.iter().all(|s| s.skip)
    }
}

/// Sleep `total`, logging the time left every `step`.
pub async fn sleep_with_countdown(total: Duration, step: Duration) {
    let deadline = Instant::now() + total;
    let step = if step.is_zero() { total } else { step };

    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        info!(remaining_secs = left.as_secs(), "Waiting");
        tokio::time::sleep(step.min(left)).await;
    }
}
