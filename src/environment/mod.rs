//! Environment lifecycle: provisioning, deployment, genesis and teardown.

pub mod deployment;
pub mod diagnostic_hints;
pub mod error;
pub mod genesis;
pub mod lifecycle;
pub mod logging_stack;
pub mod namespace;
pub mod node_pool;
pub mod reporter;
pub mod state_machine;
pub mod wait;

pub use deployment::{DeploymentInfo, DeploymentOrchestrator, NetworkDeploymentInfo};
pub use error::{Error, PhaseFailure, Result};
pub use genesis::{GenesisSchedule, GenesisSynchronizer};
pub use lifecycle::{Environment, EnvironmentLifecycle, RunReport, SetupOutcome};
pub use logging_stack::LoggingStackDeployer;
pub use namespace::NamespaceProvisioner;
pub use node_pool::{NodePoolScaler, ScaledPool};
pub use reporter::{TestOutcome, TestResultReporter};
pub use state_machine::{LifecycleEvent, LifecycleState};
