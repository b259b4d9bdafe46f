//! Teardown reporting.
//!
//! At the end of every non-skipped run exactly one task goes to the teardown
//! queue. It always asks for namespace and pool deletion; when the run failed
//! it also carries everything needed to dump the namespace's log store first.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::cloud::TaskQueue;
use crate::config::{CloudSettings, ElasticSettings, QueueSettings};
use crate::environment::error::Result;
use crate::environment::node_pool::pool_name;

/// Result of one run as seen by teardown
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    pub success: bool,
    pub namespace: String,
    /// UTC date of the run's log indices, `%Y.%m.%d`.
    pub index_date: String,
}

/// Where the namespace's log store is reachable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EsConnection {
    pub ip: String,
    pub user: String,
    pub password: String,
    /// Long-lived store the dump is copied into.
    pub main_ip: String,
}

impl EsConnection {
    pub fn new(ip: impl Into<String>, elastic: &ElasticSettings) -> Self {
        Self {
            ip: ip.into(),
            user: elastic.user.clone(),
            password: elastic.password.clone(),
            main_ip: elastic.main_es_ip.clone(),
        }
    }
}

/// Queue the teardown task is submitted to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueParams {
    pub project_id: String,
    pub queue_name: String,
    pub queue_zone: String,
}

/// Log dump parameters, only sent for failed runs
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DumpParams {
    pub index_date: String,
    pub es_ip: String,
    pub es_user: String,
    pub es_pass: String,
    pub main_es_ip: String,
    pub dump_queue_name: String,
    pub dump_queue_zone: String,
}

/// Body of the teardown task
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskPayload {
    pub namespace: String,
    pub is_delns: bool,
    pub is_dump: bool,
    pub project_id: String,
    pub pool_name: String,
    pub cluster_name: String,
    pub node_pool_zone: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub dump: Option<DumpParams>,
}

/// Builds and submits the teardown task
pub struct TestResultReporter<Q> {
    queue: Arc<Q>,
    cloud: CloudSettings,
    queues: QueueSettings,
}

impl<Q: TaskQueue> TestResultReporter<Q> {
    pub fn new(queue: Arc<Q>, cloud: CloudSettings, queues: QueueSettings) -> Self {
        Self {
            queue,
            cloud,
            queues,
        }
    }

    /// Dump parameters for a failed run, `None` for a successful one.
    pub fn dump_params(&self, outcome: &TestOutcome, es: &EsConnection) -> Option<DumpParams> {
        (!outcome.success).then(|| DumpParams {
            index_date: outcome.index_date.clone(),
            es_ip: es.ip.clone(),
            es_user: es.user.clone(),
            es_pass: es.password.clone(),
            main_es_ip: es.main_ip.clone(),
            dump_queue_name: self.queues.dump_queue.clone(),
            dump_queue_zone: self.queues.dump_zone.clone(),
        })
    }

    pub fn queue_params(&self) -> QueueParams {
        QueueParams {
            project_id: self.cloud.project_id.clone(),
            queue_name: self.queues.teardown_queue.clone(),
            queue_zone: self.queues.teardown_zone.clone(),
        }
    }

    pub fn payload(&self, outcome: &TestOutcome, es: &EsConnection) -> TaskPayload {
        TaskPayload {
            namespace: outcome.namespace.clone(),
            is_delns: true,
            is_dump: !outcome.success,
            project_id: self.cloud.project_id.clone(),
            pool_name: pool_name(&outcome.namespace),
            cluster_name: self.cloud.cluster_name.clone(),
            node_pool_zone: self.cloud.cluster_zone.clone(),
            dump: self.dump_params(outcome, es),
        }
    }

    /// Submit the teardown task for `outcome`.
    ///
    /// The task is fire-and-forget: a submission error is logged and returned
    /// but nothing is retried.
    #[instrument(skip(self, es), fields(namespace = %outcome.namespace, success = outcome.success))]
    pub async fn report(&self, outcome: &TestOutcome, es: &EsConnection) -> Result<TaskPayload> {
        let queue = self.queue_params();
        let payload = self.payload(outcome, es);

        match self.queue.submit(&queue, &payload).await {
            Ok(()) => {
                info!(
                    queue = %queue.queue_name,
                    is_dump = payload.is_dump,
                    pool = %payload.pool_name,
                    "Teardown task submitted"
                );
                Ok(payload)
            }
            Err(e) => {
                error!(queue = %queue.queue_name, error = %e, "Failed to submit teardown task");
                Err(e)
            }
        }
    }
}
