//! Cloud-side collaborators: compute node pools and the teardown task queue.
//!
//! The lifecycle depends only on [`NodePoolProvider`] and [`TaskQueue`].
//! [`GkeNodePools`] and [`CloudTasksQueue`] implement them over the Google
//! REST APIs with a bearer token.

mod cloud_tasks;
mod gke;

pub use cloud_tasks::CloudTasksQueue;
pub use gke::GkeNodePools;

use std::future::Future;
use std::time::Duration;

use crate::environment::error::{Error, Result};
use crate::environment::reporter::{QueueParams, TaskPayload};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A node pool to create for one namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePoolRequest {
    pub name: String,
    pub nodes: u32,
    pub machine_type: String,
    pub disk_size_gb: u32,
}

/// Lifecycle of a node pool as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolStatus {
    Provisioning,
    Running,
    Error(String),
}

/// Compute pool API
pub trait NodePoolProvider: Send + Sync {
    fn create_pool(&self, request: &NodePoolRequest) -> impl Future<Output = Result<()>> + Send;

    /// `None` while the provider does not know the pool yet.
    fn pool_status(&self, name: &str) -> impl Future<Output = Result<Option<PoolStatus>>> + Send;
}

/// One-way task submission
pub trait TaskQueue: Send + Sync {
    fn submit(
        &self,
        queue: &QueueParams,
        payload: &TaskPayload,
    ) -> impl Future<Output = Result<()>> + Send;
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("testnet-harness/", env!("CARGO_PKG_VERSION")))
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

fn authorize(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Turn a non-success response into `Error::Cloud` carrying the body, or
/// `Error::Http` for statuses worth retrying.
async fn check_status(what: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(response.error_for_status().err().map_or_else(
            || Error::cloud(format!("{what} returned {status}")),
            Error::Http,
        ));
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::cloud(format!("{what} returned {status}: {}", body.trim())))
}
