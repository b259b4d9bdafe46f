use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tracing::{debug, instrument};

use crate::cloud::{TaskQueue, authorize, check_status, http_client};
use crate::environment::error::Result;
use crate::environment::reporter::{QueueParams, TaskPayload};

const CLOUD_TASKS_API: &str = "https://cloudtasks.googleapis.com/v2";
/// Handler path of the teardown service.
const TEARDOWN_URI: &str = "/";

/// Cloud Tasks queue whose tasks are delivered to an App Engine handler
pub struct CloudTasksQueue {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl CloudTasksQueue {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_endpoint(CLOUD_TASKS_API, token)
    }

    pub fn with_endpoint(endpoint: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn tasks_url(&self, queue: &QueueParams) -> String {
        format!(
            "{}/projects/{}/locations/{}/queues/{}/tasks",
            self.endpoint, queue.project_id, queue.queue_zone, queue.queue_name
        )
    }
}

fn task_body(payload: &TaskPayload) -> Result<serde_json::Value> {
    let encoded = STANDARD.encode(serde_json::to_vec(payload)?);
    Ok(json!({
        "task": {
            "appEngineHttpRequest": {
                "httpMethod": "POST",
                "relativeUri": TEARDOWN_URI,
                "headers": { "Content-Type": "application/json" },
                "body": encoded,
            }
        }
    }))
}

impl TaskQueue for CloudTasksQueue {
    #[instrument(skip(self, payload), fields(queue = %queue.queue_name, namespace = %payload.namespace))]
    async fn submit(&self, queue: &QueueParams, payload: &TaskPayload) -> Result<()> {
        let response = authorize(self.http.post(self.tasks_url(queue)), self.token.as_deref())
            .json(&task_body(payload)?)
            .send()
            .await?;
        check_status("task create", response).await?;
        debug!("Task created");
        Ok(())
    }
}
