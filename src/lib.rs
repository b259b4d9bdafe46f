//! testnet-harness library crate
//!
//! Brings up an isolated test network on Kubernetes, hands it to scenarios,
//! and schedules its dump and deletion afterwards.

pub mod cloud;
pub mod cluster;
pub mod config;
pub mod environment;
pub mod resources;
pub mod scenario;

use std::sync::Arc;

use tracing::info;

use cloud::{CloudTasksQueue, GkeNodePools};
use cluster::{KubeCluster, KubeTimingService};
use config::{HarnessSettings, NetworkConfig};
use environment::{EnvironmentLifecycle, Result};

/// Lifecycle wired to the real cluster, GKE and Cloud Tasks.
pub type HarnessLifecycle =
    EnvironmentLifecycle<KubeCluster, GkeNodePools, CloudTasksQueue, KubeTimingService>;

/// Connect to the cluster and cloud APIs described by `settings`.
pub async fn connect(
    config: NetworkConfig,
    settings: HarnessSettings,
) -> Result<(Arc<KubeCluster>, HarnessLifecycle)> {
    let cluster = Arc::new(KubeCluster::connect(&settings.kube).await?);
    let pools = Arc::new(GkeNodePools::new(&settings.cloud)?);
    let queue = Arc::new(CloudTasksQueue::new(settings.cloud.access_token.clone())?);
    let timing = Arc::new(KubeTimingService::new(cluster.client().clone())?);

    info!(
        project = %settings.cloud.project_id,
        cluster = %settings.cloud.cluster_name,
        zone = %settings.cloud.cluster_zone,
        "Harness connected"
    );
    let lifecycle =
        EnvironmentLifecycle::new(config, settings, cluster.clone(), pools, queue, timing);
    Ok((cluster, lifecycle))
}
