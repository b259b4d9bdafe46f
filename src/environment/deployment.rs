//! Staged node deployment.
//!
//! The bootstrap group goes first. Its pods must be ready and its timing
//! service must log that the REST proxy is listening before the one-time
//! start call is made. Client groups follow and are pointed at the bootstrap
//! pod; they are only gated on pod readiness.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::cluster::{ClusterOps, Manifest, PodInfo, TimingService};
use crate::config::NodeSpec;
use crate::environment::error::{Error, Result};
use crate::environment::genesis::GenesisSchedule;
use crate::environment::wait::{PollConfig, poll_until};
use crate::resources::common::pod_selector;
use crate::resources::node::{
    BOOTSTRAP_GROUP, NodePlacement, POET_CONTAINER, bootstrap_deployment, client_deployment,
};

/// Log line the timing service prints once it accepts requests.
pub const POET_READY_PHRASE: &str = "REST proxy start listening on 0.0.0.0:80";

/// Body of the timing service start call.
pub const POET_START_BODY: &str = r#"{ "gatewayAddresses": ["127.0.0.1:9092"] }"#;

/// Name of the default client group.
pub const CLIENT_GROUP: &str = "client";
/// Name of the optional second client group.
pub const CLIENT_V2_GROUP: &str = "clientv2";

/// One deployed node group; never empty and fully ready when returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub name: String,
    /// Namespace the group lives in.
    pub id: String,
    pub pods: Vec<PodInfo>,
}

impl DeploymentInfo {
    /// First pod of the group.
    pub fn first_pod(&self) -> Result<&PodInfo> {
        self.pods
            .first()
            .ok_or_else(|| Error::config(format!("deployment {} has no pods", self.name)))
    }
}

/// Every node group of a running network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkDeploymentInfo {
    pub namespace: String,
    pub bootstrap: DeploymentInfo,
    pub clients: DeploymentInfo,
    pub clients_v2: Option<DeploymentInfo>,
}

impl NetworkDeploymentInfo {
    /// Every deployed group, bootstrap first.
    pub fn groups(&self) -> impl Iterator<Item = &DeploymentInfo> {
        [&self.bootstrap, &self.clients]
            .into_iter()
            .chain(self.clients_v2.as_ref())
    }

    /// All node pods, bootstrap first.
    pub fn all_pods(&self) -> impl Iterator<Item = &PodInfo> {
        self.groups().flat_map(|group| group.pods.iter())
    }
}

/// Deploys node groups and gates on their readiness
pub struct DeploymentOrchestrator<C, T> {
    cluster: Arc<C>,
    timing: Arc<T>,
    interval: Duration,
    pool: Option<String>,
}

impl<C: ClusterOps, T: TimingService> DeploymentOrchestrator<C, T> {
    pub fn new(cluster: Arc<C>, timing: Arc<T>, interval: Duration) -> Self {
        Self {
            cluster,
            timing,
            interval,
            pool: None,
        }
    }

    /// Pin node pods to `pool`.
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    fn placement<'a>(&'a self, namespace: &'a str, genesis: &'a str) -> NodePlacement<'a> {
        NodePlacement {
            namespace,
            pool: self.pool.as_deref(),
            genesis_time: genesis,
        }
    }

    /// Deploy the bootstrap group and start its timing service.
    ///
    /// Fails with `ReadinessTimeout` when the pods are not ready within
    /// `timeout`, `DependencyNotReady` when the timing service never logs
    /// [`POET_READY_PHRASE`] within `timeout`, and `Initialization` when the
    /// start call answers anything but `{}`.
    #[instrument(skip(self, spec, schedule, timeout))]
    pub async fn deploy_bootstrap(
        &self,
        namespace: &str,
        spec: &NodeSpec,
        schedule: &GenesisSchedule,
        timeout: Duration,
    ) -> Result<DeploymentInfo> {
        let genesis = schedule.genesis_arg();
        let deployment = bootstrap_deployment(&self.placement(namespace, &genesis), spec);
        self.cluster
            .create(namespace, &Manifest::Deployment(deployment))
            .await?;
        info!(replicas = spec.replicas, genesis = %genesis, "Bootstrap deployment created");

        let info = self
            .await_group(namespace, BOOTSTRAP_GROUP, spec.replicas, timeout)
            .await?;
        let pod = info.first_pod()?;

        self.await_log_phrase(namespace, pod, timeout).await?;

        let response = self
            .timing
            .initialize(namespace, pod, POET_START_BODY)
            .await?;
        if response.trim() != "{}" {
            return Err(Error::Initialization { response });
        }
        info!(pod = %pod.name, "Timing service started");

        Ok(info)
    }

    /// Deploy client group `group` pointed at `bootstrap_pod`.
    #[instrument(skip(self, bootstrap_pod, spec, schedule, timeout), fields(bootstrap = %bootstrap_pod.name))]
    pub async fn deploy_clients(
        &self,
        namespace: &str,
        bootstrap_pod: &PodInfo,
        spec: &NodeSpec,
        group: &str,
        schedule: &GenesisSchedule,
        timeout: Duration,
    ) -> Result<DeploymentInfo> {
        let genesis = schedule.genesis_arg();
        let deployment =
            client_deployment(&self.placement(namespace, &genesis), group, spec, bootstrap_pod);
        self.cluster
            .create(namespace, &Manifest::Deployment(deployment))
            .await?;
        info!(replicas = spec.replicas, "Client deployment created");

        self.await_group(namespace, group, spec.replicas, timeout)
            .await
    }

    /// Poll until `replicas` pods of `group` are ready and have addresses.
    async fn await_group(
        &self,
        namespace: &str,
        group: &str,
        replicas: i32,
        timeout: Duration,
    ) -> Result<DeploymentInfo> {
        let cluster = self.cluster.as_ref();
        let selector = pod_selector(group);
        let selector = selector.as_str();
        let wanted = usize::try_from(replicas).unwrap_or_default().max(1);
        let poll = PollConfig::new(timeout, self.interval);

        let pods = poll_until(&format!("{group} pods"), poll, move || async move {
            let pods = cluster.list_pods(namespace, selector).await?;
            let ready = pods.iter().filter(|p| p.ready && !p.ip.is_empty()).count();
            debug!(group = group, ready = ready, wanted = wanted, "Pod readiness");
            Ok((pods.len() >= wanted && ready == pods.len()).then_some(pods))
        })
        .await?;

        info!(group = group, pods = pods.len(), "Group ready");
        Ok(DeploymentInfo {
            name: group.to_string(),
            id: namespace.to_string(),
            pods,
        })
    }

    /// Poll the timing-service log of `pod` for the ready phrase.
    async fn await_log_phrase(&self, namespace: &str, pod: &PodInfo, timeout: Duration) -> Result<()> {
        let cluster = self.cluster.as_ref();
        let name = pod.name.as_str();
        let poll = PollConfig::new(timeout, self.interval);

        let found = poll_until("timing service log", poll, move || async move {
            let log = cluster.pod_logs(namespace, name, POET_CONTAINER).await?;
            Ok(log.contains(POET_READY_PHRASE).then_some(()))
        })
        .await;

        match found {
            Ok(()) => Ok(()),
            Err(Error::ReadinessTimeout { timeout, .. }) => Err(Error::DependencyNotReady {
                pod: pod.name.clone(),
                phrase: POET_READY_PHRASE,
                timeout,
            }),
            Err(e) => Err(e),
        }
    }
}
