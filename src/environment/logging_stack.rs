//! Logging stack deployment and readiness gating.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::cluster::ClusterOps;
use crate::config::ElasticSettings;
use crate::environment::error::Result;
use crate::environment::wait::{PollConfig, poll_until};
use crate::resources::logging::{logging_stack, logging_workloads};

/// Deploys Elasticsearch, Fluent Bit and Kibana into the run's namespace
pub struct LoggingStackDeployer<C> {
    cluster: Arc<C>,
    elastic: ElasticSettings,
    poll: PollConfig,
}

impl<C: ClusterOps> LoggingStackDeployer<C> {
    pub fn new(cluster: Arc<C>, elastic: ElasticSettings, poll: PollConfig) -> Self {
        Self {
            cluster,
            elastic,
            poll,
        }
    }

    /// Create the stack and block until every part serves.
    ///
    /// Objects are created in a fixed order without waiting on earlier ones;
    /// the readiness poll afterwards covers all three workloads at once.
    #[instrument(skip(self))]
    pub async fn deploy(&self, namespace: &str) -> Result<()> {
        for manifest in logging_stack(namespace, &self.elastic) {
            self.cluster.create(namespace, &manifest).await?;
            debug!(kind = %manifest.kind(), name = %manifest.name(), "Logging object created");
        }

        poll_until("logging stack", self.poll, || self.stack_ready(namespace)).await?;
        info!("Logging stack ready");
        Ok(())
    }

    /// `Some(())` once indexer, collector and dashboard are all serving.
    async fn stack_ready(&self, namespace: &str) -> Result<Option<()>> {
        for workload in logging_workloads() {
            let serving = self
                .cluster
                .workload_status(namespace, &workload)
                .await?
                .is_some_and(|counts| counts.is_serving());
            if !serving {
                debug!(workload = %workload, "Not serving yet");
                return Ok(None);
            }
        }
        Ok(Some(()))
    }
}
