//! Environment-level harness settings.
//!
//! Everything that is not part of the network description comes from the
//! process environment: credentials, the image override, cloud project
//! identity, queue names and the bounded-wait timeouts.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::environment::error::{Error, Result};
use crate::environment::namespace::NAMESPACE_SUFFIX_LEN;
use crate::environment::wait::DEFAULT_POLL_INTERVAL;

/// Default timeout for the logging stack to accept traffic.
pub const DEFAULT_LOGGING_STACK_TIMEOUT: Duration = Duration::from_secs(600);
/// Default timeout for a new node pool to become schedulable.
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(900);
/// Default timeout for the log collector daemon to cover new nodes.
pub const DEFAULT_DAEMON_TIMEOUT: Duration = Duration::from_secs(60);

/// Where cluster credentials come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KubeCredentials {
    /// Kubeconfig file; in-cluster credentials are used when it does not exist.
    pub kubeconfig: PathBuf,
    /// Named context inside the kubeconfig.
    pub context: Option<String>,
}

/// Cloud project hosting the cluster and its node pools
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudSettings {
    pub project_id: String,
    pub cluster_name: String,
    pub cluster_zone: String,
    /// OAuth bearer token for the pool and task queue APIs.
    pub access_token: Option<String>,
}

/// Task queues used at teardown
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    pub teardown_queue: String,
    pub teardown_zone: String,
    pub dump_queue: String,
    pub dump_zone: String,
}

/// Credentials of the per-namespace log store and the address of the main one
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElasticSettings {
    pub user: String,
    pub password: String,
    pub main_es_ip: String,
}

/// Bounded waits that are not part of the network config
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub poll_interval: Duration,
    pub logging_stack: Duration,
    pub node_pool: Duration,
    pub daemon: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            logging_stack: DEFAULT_LOGGING_STACK_TIMEOUT,
            node_pool: DEFAULT_POOL_TIMEOUT,
            daemon: DEFAULT_DAEMON_TIMEOUT,
        }
    }
}

/// All environment-level inputs of one run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessSettings {
    /// Operator identity, used as the generated namespace prefix.
    pub operator: String,
    /// Node image override (`CLIENT_DOCKER_IMAGE`), empty for none.
    pub image_override: String,
    /// Re-raise setup failures and skip teardown.
    pub debug: bool,
    pub kube: KubeCredentials,
    pub cloud: CloudSettings,
    pub queues: QueueSettings,
    pub elastic: ElasticSettings,
    pub timeouts: TimeoutSettings,
}

impl HarnessSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which returns the value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| Error::config(format!("environment variable {key} is not set")))
        };

        let operator = get("USER").map(|u| sanitize_operator(&u)).unwrap_or_else(|| {
            warn!("USER not set, using 'harness' as namespace prefix");
            "harness".to_string()
        });

        let kubeconfig = get("KUBECONFIG")
            .map(PathBuf::from)
            .or_else(|| get("HOME").map(|h| PathBuf::from(h).join(".kube").join("config")))
            .unwrap_or_else(|| PathBuf::from("~/.kube/config"));

        let cluster_zone = required("CLUSTER_ZONE")?;
        let default_region = region_of(&cluster_zone);

        let timeouts = TimeoutSettings {
            poll_interval: secs_or(&get, "HARNESS_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            logging_stack: secs_or(&get, "LOGGING_STACK_TIMEOUT_SECS", DEFAULT_LOGGING_STACK_TIMEOUT)?,
            node_pool: secs_or(&get, "NODE_POOL_TIMEOUT_SECS", DEFAULT_POOL_TIMEOUT)?,
            daemon: secs_or(&get, "DAEMON_TIMEOUT_SECS", DEFAULT_DAEMON_TIMEOUT)?,
        };

        Ok(Self {
            operator,
            image_override: get("CLIENT_DOCKER_IMAGE").unwrap_or_default(),
            debug: get("HARNESS_DEBUG").is_some_and(|v| is_truthy(&v)),
            kube: KubeCredentials {
                kubeconfig,
                context: get("KUBE_CONTEXT"),
            },
            cloud: CloudSettings {
                project_id: required("PROJECT_ID")?,
                cluster_name: required("CLUSTER_NAME")?,
                cluster_zone,
                access_token: get("GCP_ACCESS_TOKEN"),
            },
            queues: QueueSettings {
                teardown_queue: get("TD_QUEUE_NAME").unwrap_or_else(|| "teardown".to_string()),
                teardown_zone: get("TD_QUEUE_ZONE").unwrap_or_else(|| default_region.clone()),
                dump_queue: get("DUMP_QUEUE_NAME").unwrap_or_else(|| "dump".to_string()),
                dump_zone: get("DUMP_QUEUE_ZONE").unwrap_or(default_region),
            },
            elastic: ElasticSettings {
                user: get("ES_USER_LOCAL").unwrap_or_else(|| "elastic".to_string()),
                password: required("ES_PASS_LOCAL")?,
                main_es_ip: required("MAIN_ES_IP")?,
            },
            timeouts,
        })
    }
}

/// Longest operator that still fits `<operator>-<suffix>` in a 63 character
/// namespace name.
pub const MAX_OPERATOR_LEN: usize = 63 - 1 - NAMESPACE_SUFFIX_LEN;

/// Lowercase the operator name, keep only characters valid in a namespace and
/// clamp it to [`MAX_OPERATOR_LEN`].
fn sanitize_operator(user: &str) -> String {
    let cleaned: String = user
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(MAX_OPERATOR_LEN)
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "harness".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Region of a zone (`us-east1-b` -> `us-east1`).
fn region_of(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if suffix.len() == 1 => region.to_string(),
        _ => zone.to_string(),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn secs_or<F>(get: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::config(format!("{key}={v:?} is not a number of seconds"))),
        None => Ok(default),
    }
}
