use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cloud::{NodePoolProvider, NodePoolRequest, PoolStatus, authorize, check_status, http_client};
use crate::config::CloudSettings;
use crate::environment::error::Result;

const CONTAINER_API: &str = "https://container.googleapis.com/v1";

/// GKE node pools of one cluster
pub struct GkeNodePools {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePoolBody<'a> {
    node_pool: PoolDefinition<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolDefinition<'a> {
    name: &'a str,
    initial_node_count: u32,
    config: PoolNodeConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolNodeConfig<'a> {
    machine_type: &'a str,
    disk_size_gb: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolResource {
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_message: String,
}

impl GkeNodePools {
    pub fn new(cloud: &CloudSettings) -> Result<Self> {
        Self::with_endpoint(CONTAINER_API, cloud)
    }

    /// Point at a different API root, e.g. a local emulator.
    pub fn with_endpoint(endpoint: &str, cloud: &CloudSettings) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: format!(
                "{}/projects/{}/locations/{}/clusters/{}/nodePools",
                endpoint.trim_end_matches('/'),
                cloud.project_id,
                cloud.cluster_zone,
                cloud.cluster_name
            ),
            token: cloud.access_token.clone(),
        })
    }
}

fn create_body(request: &NodePoolRequest) -> CreatePoolBody<'_> {
    CreatePoolBody {
        node_pool: PoolDefinition {
            name: &request.name,
            initial_node_count: request.nodes,
            config: PoolNodeConfig {
                machine_type: &request.machine_type,
                disk_size_gb: request.disk_size_gb,
            },
        },
    }
}

fn parse_status(resource: PoolResource) -> PoolStatus {
    match resource.status.as_str() {
        "RUNNING" => PoolStatus::Running,
        "ERROR" | "RUNNING_WITH_ERROR" | "STOPPING" => PoolStatus::Error(if resource
            .status_message
            .is_empty()
        {
            resource.status
        } else {
            resource.status_message
        }),
        _ => PoolStatus::Provisioning,
    }
}

impl NodePoolProvider for GkeNodePools {
    #[instrument(skip(self, request), fields(pool = %request.name, nodes = request.nodes))]
    async fn create_pool(&self, request: &NodePoolRequest) -> Result<()> {
        let response = authorize(self.http.post(&self.base_url), self.token.as_deref())
            .json(&create_body(request))
            .send()
            .await?;
        check_status("node pool create", response).await?;
        info!(machine_type = %request.machine_type, "Node pool creation requested");
        Ok(())
    }

    async fn pool_status(&self, name: &str) -> Result<Option<PoolStatus>> {
        let url = format!("{}/{name}", self.base_url);
        let response = authorize(self.http.get(&url), self.token.as_deref())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resource: PoolResource = check_status("node pool get", response).await?.json().await?;
        debug!(pool = name, status = %resource.status, "Node pool status");
        Ok(Some(parse_status(resource)))
    }
}
