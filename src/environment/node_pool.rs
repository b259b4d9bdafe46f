//! Node pool sizing and provisioning.
//!
//! The pool is sized from the memory the node groups request, created under
//! `pool-<namespace>`, and only handed over once the log collector runs on
//! every one of its nodes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, instrument};

use crate::cloud::{NodePoolProvider, NodePoolRequest, PoolStatus};
use crate::cluster::{ClusterOps, WorkloadKind, WorkloadRef};
use crate::config::{NetworkConfig, TimeoutSettings, parse_memory_mb};
use crate::environment::error::{Error, Result};
use crate::environment::wait::{PollConfig, poll_until};
use crate::resources::logging::FLUENT_BIT;

/// Name of the pool backing `namespace`.
pub fn pool_name(namespace: &str) -> String {
    format!("pool-{namespace}")
}

/// Nodes needed to hold `total_mb` on nodes of `node_mb` each, at least one.
pub fn nodes_for(total_mb: u64, node_mb: u64) -> u32 {
    if node_mb == 0 {
        return 1;
    }
    u32::try_from(total_mb.div_ceil(node_mb))
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Total memory requested by all node groups of `config`, in megabytes.
pub fn requested_memory_mb(config: &NetworkConfig) -> Result<u64> {
    config.node_groups().try_fold(0u64, |total, group| {
        let per_pod = group.memory_request_mb()?;
        let replicas = u64::try_from(group.replicas).unwrap_or_default();
        Ok(total.saturating_add(per_pod.saturating_mul(replicas)))
    })
}

/// A pool that is running and covered by the log collector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScaledPool {
    pub name: String,
    pub nodes: u32,
    /// Time spent waiting for the pool to run.
    pub elapsed: Duration,
}

/// Provisions the run's node pool
pub struct NodePoolScaler<C, P> {
    cluster: Arc<C>,
    pools: Arc<P>,
    timeouts: TimeoutSettings,
}

impl<C: ClusterOps, P: NodePoolProvider> NodePoolScaler<C, P> {
    pub fn new(cluster: Arc<C>, pools: Arc<P>, timeouts: TimeoutSettings) -> Self {
        Self {
            cluster,
            pools,
            timeouts,
        }
    }

    /// Pool request for `namespace` sized from `config`.
    pub fn plan(&self, namespace: &str, config: &NetworkConfig) -> Result<NodePoolRequest> {
        let node_mb = parse_memory_mb(&config.node_pool.node_memory)?;
        let total_mb = requested_memory_mb(config)?;
        Ok(NodePoolRequest {
            name: pool_name(namespace),
            nodes: nodes_for(total_mb, node_mb),
            machine_type: config.node_pool.machine_type.clone(),
            disk_size_gb: config.node_pool.disk_size_gb,
        })
    }

    /// Create the pool, wait for it to run, then wait for the collector
    /// daemon to cover its nodes.
    #[instrument(skip(self, config))]
    pub async fn scale(&self, namespace: &str, config: &NetworkConfig) -> Result<ScaledPool> {
        let request = self.plan(namespace, config)?;
        info!(pool = %request.name, nodes = request.nodes, "Creating node pool");
        self.pools.create_pool(&request).await?;

        let started = Instant::now();
        let pool_poll = PollConfig::new(self.timeouts.node_pool, self.timeouts.poll_interval);
        let pools = self.pools.as_ref();
        let name = request.name.as_str();
        poll_until(&format!("node pool {name}"), pool_poll, move || async move {
            match pools.pool_status(name).await? {
                Some(PoolStatus::Running) => Ok(Some(())),
                Some(PoolStatus::Error(msg)) => {
                    Err(Error::cloud(format!("node pool {name} failed: {msg}")))
                }
                Some(PoolStatus::Provisioning) | None => Ok(None),
            }
        })
        .await?;
        let elapsed = started.elapsed();
        info!(
            pool = %request.name,
            elapsed_ms = elapsed.as_millis() as u64,
            "Node pool running"
        );

        self.await_collector(namespace, request.nodes).await?;

        Ok(ScaledPool {
            name: request.name,
            nodes: request.nodes,
            elapsed,
        })
    }

    /// Wait until the collector DaemonSet has at least `nodes` ready pods and
    /// no unready ones.
    async fn await_collector(&self, namespace: &str, nodes: u32) -> Result<()> {
        let daemon = WorkloadRef::new(WorkloadKind::DaemonSet, FLUENT_BIT);
        let poll = PollConfig::new(self.timeouts.daemon, self.timeouts.poll_interval);
        let wanted = i32::try_from(nodes).unwrap_or(i32::MAX);

        let cluster = self.cluster.as_ref();
        let daemon = &daemon;
        poll_until(&format!("{daemon} on new nodes"), poll, move || async move {
            let counts = cluster.workload_status(namespace, daemon).await?;
            Ok(counts
                .filter(|c| c.ready >= wanted && c.ready == c.desired)
                .map(|_| ()))
        })
        .await
    }
}
