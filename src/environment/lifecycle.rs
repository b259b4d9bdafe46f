//! Environment lifecycle coordinator.
//!
//! Drives one run through the state machine:
//!
//! ```text
//! NotStarted -> Provisioning -> LoggingReady -> PoolScaled -> BootstrapReady
//!            -> ClientsReady -> GenesisSynced -> Running -> Reporting -> Done
//! NotStarted -> Skipped
//! <any setup state> -> Reporting      (setup failure, unless debug)
//! ```
//!
//! A setup failure is logged with diagnostic hints and turned into a failed
//! outcome, so the namespace is still dumped and deleted. In debug mode the
//! failure is returned instead and teardown never runs, leaving the namespace
//! in place for inspection.

use std::sync::Arc;

use jiff::Timestamp;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::cloud::{NodePoolProvider, TaskQueue};
use crate::cluster::{ClusterOps, TimingService};
use crate::config::{HarnessSettings, NetworkConfig};
use crate::environment::deployment::{
    CLIENT_GROUP, CLIENT_V2_GROUP, DeploymentOrchestrator, NetworkDeploymentInfo,
};
use crate::environment::diagnostic_hints::DiagnosticHint;
use crate::environment::error::{Error, PhaseFailure, Result};
use crate::environment::genesis::{GenesisSchedule, GenesisSynchronizer};
use crate::environment::logging_stack::LoggingStackDeployer;
use crate::environment::namespace::{NamespaceProvisioner, random_namespace};
use crate::environment::node_pool::{NodePoolScaler, ScaledPool};
use crate::environment::reporter::{EsConnection, TaskPayload, TestOutcome, TestResultReporter};
use crate::environment::state_machine::{
    LifecycleEvent, LifecycleState, LifecycleStateMachine, TransitionResult,
};
use crate::environment::wait::PollConfig;
use crate::resources::logging::{ELASTICSEARCH, elasticsearch_dns};
use crate::scenario::{ScenarioOutcome, ScenarioResult, ScenarioSuite};

/// A fully set-up network handed to scenarios
#[derive(Clone, Debug)]
pub struct Environment {
    pub namespace: String,
    pub config: Arc<NetworkConfig>,
    pub network: NetworkDeploymentInfo,
    pub pool: ScaledPool,
    pub genesis_time: Timestamp,
    /// UTC date of the run's log indices, `%Y.%m.%d`.
    pub index_date: String,
}

/// How setup ended
#[derive(Debug)]
pub enum SetupOutcome {
    Ready(Environment),
    Skipped,
    /// Setup failed; teardown still reports the run as failed.
    Failed(PhaseFailure),
}

/// Everything that happened in one suite run
#[derive(Debug)]
pub struct RunReport {
    pub suite: String,
    pub namespace: Option<String>,
    pub skipped: bool,
    pub setup_failure: Option<PhaseFailure>,
    pub scenarios: Vec<ScenarioResult>,
    /// Teardown task as submitted, `None` when nothing was reported.
    pub teardown: Option<TaskPayload>,
}

impl RunReport {
    fn skipped(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            namespace: None,
            skipped: true,
            setup_failure: None,
            scenarios: Vec::new(),
            teardown: None,
        }
    }

    /// Setup succeeded and no scenario failed.
    pub fn success(&self) -> bool {
        self.setup_failure.is_none()
            && self
                .scenarios
                .iter()
                .all(|s| !matches!(s.outcome, ScenarioOutcome::Failed(_)))
    }
}

/// Sequences setup, scenarios and teardown of one environment
pub struct EnvironmentLifecycle<C, P, Q, T> {
    config: NetworkConfig,
    settings: HarnessSettings,
    cluster: Arc<C>,
    timing: Arc<T>,
    provisioner: NamespaceProvisioner<C>,
    logging: LoggingStackDeployer<C>,
    scaler: NodePoolScaler<C, P>,
    reporter: TestResultReporter<Q>,
    synchronizer: GenesisSynchronizer,
    machine: LifecycleStateMachine,
    state: LifecycleState,
    history: Vec<LifecycleState>,
    /// Generated at construction; names the run whenever it owns no namespace.
    run_id: String,
    /// Set once this run has created its namespace.
    namespace: Option<String>,
    index_date: String,
    reported: bool,
}

impl<C, P, Q, T> EnvironmentLifecycle<C, P, Q, T>
where
    C: ClusterOps,
    P: NodePoolProvider,
    Q: TaskQueue,
    T: TimingService,
{
    pub fn new(
        config: NetworkConfig,
        settings: HarnessSettings,
        cluster: Arc<C>,
        pools: Arc<P>,
        queue: Arc<Q>,
        timing: Arc<T>,
    ) -> Self {
        let timeouts = settings.timeouts;
        Self {
            provisioner: NamespaceProvisioner::new(cluster.clone(), settings.operator.clone()),
            logging: LoggingStackDeployer::new(
                cluster.clone(),
                settings.elastic.clone(),
                PollConfig::new(timeouts.logging_stack, timeouts.poll_interval),
            ),
            scaler: NodePoolScaler::new(cluster.clone(), pools, timeouts),
            reporter: TestResultReporter::new(
                queue,
                settings.cloud.clone(),
                settings.queues.clone(),
            ),
            synchronizer: GenesisSynchronizer,
            machine: LifecycleStateMachine::new(),
            state: LifecycleState::NotStarted,
            history: vec![LifecycleState::NotStarted],
            run_id: random_namespace(&settings.operator),
            namespace: None,
            index_date: index_date(Timestamp::now()),
            reported: false,
            config,
            settings,
            cluster,
            timing,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state this run has been in, oldest first.
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// The namespace this run created, `None` until provisioning succeeds.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The generated name that identifies this run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The namespace setup targets: the configured one, else the run id.
    fn target_namespace(&self) -> String {
        let requested = match self.config.namespace.trim() {
            "" => self.run_id.as_str(),
            name => name,
        };
        self.provisioner.resolve_name(Some(requested))
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn fire(&mut self, event: LifecycleEvent) -> Result<LifecycleState> {
        match self.machine.transition(&self.state, event) {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } => {
                info!(
                    namespace = self.namespace.as_deref().unwrap_or("-"),
                    from = %from,
                    to = %to,
                    "{description}"
                );
                self.state = to;
                self.history.push(to);
                Ok(to)
            }
            TransitionResult::InvalidTransition { current, event } => {
                Err(Error::InvalidTransition {
                    from: current,
                    event,
                })
            }
        }
    }

    /// Advance with `event`, attributing a misuse to `phase`.
    fn advance(&mut self, phase: LifecycleState, event: LifecycleEvent) -> std::result::Result<(), PhaseFailure> {
        self.fire(event)
            .map(|_| ())
            .map_err(|e| PhaseFailure::new(phase, e))
    }

    /// Bring the environment up, or skip it.
    ///
    /// Returns `Err` only in debug mode, where a setup failure is re-raised
    /// and teardown will not report.
    #[instrument(skip(self), fields(operator = %self.settings.operator))]
    pub async fn setup(&mut self, skip: bool) -> std::result::Result<SetupOutcome, PhaseFailure> {
        if skip {
            self.advance(self.state, LifecycleEvent::SkipRequested)?;
            info!("Run skipped, no environment created");
            return Ok(SetupOutcome::Skipped);
        }

        self.advance(self.state, LifecycleEvent::SetupStarted)?;
        self.index_date = index_date(Timestamp::now());
        self.config.apply_image_override(&self.settings.image_override);

        let started = Instant::now();
        match self.bring_up().await {
            Ok(env) => {
                info!(
                    namespace = %env.namespace,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Environment ready"
                );
                Ok(SetupOutcome::Ready(env))
            }
            Err(failure) => {
                let namespace = self
                    .namespace
                    .clone()
                    .unwrap_or_else(|| self.target_namespace());
                error!(
                    namespace = %namespace,
                    phase = %failure.phase,
                    error = %failure.error,
                    "Setup failed"
                );
                error!("{}", DiagnosticHint::for_phase(failure.phase, &namespace));

                if self.settings.debug {
                    warn!("Debug mode: re-raising setup failure, teardown skipped");
                    return Err(failure);
                }
                self.advance(failure.phase, LifecycleEvent::SetupFailed)?;
                Ok(SetupOutcome::Failed(failure))
            }
        }
    }

    async fn bring_up(&mut self) -> std::result::Result<Environment, PhaseFailure> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        let at = |phase: S| move |e: Error| PhaseFailure::new(phase, e);

        let namespace = self.target_namespace();
        self.provisioner
            .create_unique(&namespace)
            .await
            .map_err(at(S::Provisioning))?;
        self.namespace = Some(namespace.clone());

        self.logging
            .deploy(&namespace)
            .await
            .map_err(at(S::LoggingReady))?;
        self.advance(S::LoggingReady, E::LoggingStackReady)?;

        let pool = self
            .scaler
            .scale(&namespace, &self.config)
            .await
            .map_err(at(S::PoolScaled))?;
        info!(
            pool = %pool.name,
            nodes = pool.nodes,
            elapsed_ms = pool.elapsed.as_millis() as u64,
            "Node pool scaled"
        );
        self.advance(S::PoolScaled, E::PoolReady)?;

        let schedule =
            GenesisSchedule::start(self.config.genesis_delta()).map_err(at(S::BootstrapReady))?;
        let genesis_time = schedule.genesis_time;
        let orchestrator = DeploymentOrchestrator::new(
            self.cluster.clone(),
            self.timing.clone(),
            self.settings.timeouts.poll_interval,
        )
        .with_pool(pool.name.clone());
        let timeout = self.config.deployment_timeout();

        let bootstrap = orchestrator
            .deploy_bootstrap(&namespace, &self.config.bootstrap, &schedule, timeout)
            .await
            .map_err(at(S::BootstrapReady))?;
        self.advance(S::BootstrapReady, E::BootstrapDeployed)?;

        let bootstrap_pod = bootstrap.first_pod().map_err(at(S::ClientsReady))?.clone();
        let clients = orchestrator
            .deploy_clients(
                &namespace,
                &bootstrap_pod,
                &self.config.client,
                CLIENT_GROUP,
                &schedule,
                timeout,
            )
            .await
            .map_err(at(S::ClientsReady))?;
        let clients_v2 = match &self.config.clientv2 {
            Some(v2) => Some(
                orchestrator
                    .deploy_clients(
                        &namespace,
                        &bootstrap_pod,
                        &v2.node,
                        CLIENT_V2_GROUP,
                        &schedule,
                        timeout,
                    )
                    .await
                    .map_err(at(S::ClientsReady))?,
            ),
            None => None,
        };
        self.advance(S::ClientsReady, E::ClientsDeployed)?;

        let slept = self.synchronizer.await_schedule(schedule).await;
        debug!(slept_ms = slept.as_millis() as u64, "Genesis wait done");
        self.advance(S::GenesisSynced, E::GenesisReached)?;

        Ok(Environment {
            namespace: namespace.clone(),
            config: Arc::new(self.config.clone()),
            network: NetworkDeploymentInfo {
                namespace,
                bootstrap,
                clients,
                clients_v2,
            },
            pool,
            genesis_time,
            index_date: self.index_date.clone(),
        })
    }

    /// Mark the start of scenario execution.
    pub fn begin_scenarios(&mut self) -> Result<()> {
        self.fire(LifecycleEvent::ScenariosStarted).map(|_| ())
    }

    /// Submit the teardown task for this run.
    ///
    /// Reports at most once per lifecycle. Nothing is reported for a skipped
    /// run, before setup, or after a debug-mode setup failure. A namespace the
    /// run did not create is never named for deletion.
    #[instrument(skip(self), fields(namespace = self.namespace.as_deref().unwrap_or(&self.run_id)))]
    pub async fn teardown(&mut self, success: bool) -> Result<Option<TaskPayload>> {
        if self.reported {
            debug!("Teardown already reported");
            return Ok(None);
        }
        match self.state {
            LifecycleState::GenesisSynced => {
                self.fire(LifecycleEvent::ScenariosStarted)?;
                self.fire(LifecycleEvent::ScenariosFinished)?;
            }
            LifecycleState::Running => {
                self.fire(LifecycleEvent::ScenariosFinished)?;
            }
            LifecycleState::Reporting => {}
            state => {
                debug!(state = %state, "Nothing to report");
                return Ok(None);
            }
        }
        // A run that failed before creating its namespace names itself by run id.
        let namespace = self.namespace.clone().unwrap_or_else(|| self.run_id.clone());
        self.reported = true;

        let es = EsConnection::new(self.elasticsearch_address(&namespace).await, &self.settings.elastic);
        let outcome = TestOutcome {
            success,
            namespace,
            index_date: self.index_date.clone(),
        };
        let submitted = self.reporter.report(&outcome, &es).await;
        self.fire(LifecycleEvent::Reported)?;
        submitted.map(Some)
    }

    /// Address of the namespace's Elasticsearch, the in-cluster DNS name when
    /// the service has none yet.
    async fn elasticsearch_address(&self, namespace: &str) -> String {
        match self.cluster.service_address(namespace, ELASTICSEARCH).await {
            Ok(Some(address)) => address,
            Ok(None) => elasticsearch_dns(namespace),
            Err(e) => {
                warn!(error = %e, "Could not resolve Elasticsearch address");
                elasticsearch_dns(namespace)
            }
        }
    }

    /// Set up, run every scenario of `suite`, tear down.
    ///
    /// A suite in which no scenario would run is skipped without touching the
    /// cluster. Returns `Err` only for a debug-mode setup failure.
    pub async fn run(&mut self, suite: &ScenarioSuite) -> std::result::Result<RunReport, PhaseFailure> {
        if suite.is_skipped() {
            self.setup(true).await?;
            return Ok(RunReport::skipped(&suite.name));
        }

        let mut report = RunReport {
            suite: suite.name.clone(),
            namespace: None,
            skipped: false,
            setup_failure: None,
            scenarios: Vec::new(),
            teardown: None,
        };

        match self.setup(false).await? {
            SetupOutcome::Ready(env) => {
                report.namespace = Some(env.namespace.clone());
                if let Err(e) = self.begin_scenarios() {
                    return Err(PhaseFailure::new(self.state, e));
                }
                for scenario in &suite.scenarios {
                    report.scenarios.push(scenario.execute(env.clone()).await);
                }
            }
            SetupOutcome::Failed(failure) => {
                report.namespace = self.namespace.clone();
                report.setup_failure = Some(failure);
            }
            SetupOutcome::Skipped => {
                report.skipped = true;
                return Ok(report);
            }
        }

        let success = report.success();
        report.teardown = match self.teardown(success).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Teardown reporting failed");
                None
            }
        };
        info!(
            suite = %report.suite,
            success = success,
            scenarios = report.scenarios.len(),
            "Suite finished"
        );
        Ok(report)
    }
}

/// `%Y.%m.%d` in UTC.
pub fn index_date(now: Timestamp) -> String {
    now.strftime("%Y.%m.%d").to_string()
}
