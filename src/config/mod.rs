//! Test network configuration.
//!
//! A run is described by one YAML document:
//!
//! ```yaml
//! namespace: ""              # empty: generate <operator>-<suffix>
//! genesis_delta: 60          # seconds
//! deployment_ready_time_out: 120
//! bootstrap:
//!   image: registry.example.com/node:develop
//!   poet_image: registry.example.com/poet:develop
//!   replicas: 1
//!   resources:
//!     requests: { memory: 1024M, cpu: "1" }
//!   args:
//!     layers-per-epoch: 3
//!     layer-duration-sec: 30
//! client:
//!   image: registry.example.com/node:develop
//!   replicas: 10
//!   resources:
//!     requests: { memory: 1024M }
//!   args:
//!     layers-per-epoch: 3
//!     layer-duration-sec: 30
//! clientv2:                  # optional second client group
//!   image: registry.example.com/node:v2
//!   noreplace: true
//! node_pool:                 # optional
//!   machine_type: n1-standard-4
//!   node_memory: 15G
//! ```

mod settings;

pub use settings::*;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::environment::error::{Error, Result};

/// Timing-service container image used when the bootstrap spec names none.
pub const DEFAULT_POET_IMAGE: &str = "spacemeshos/poet:develop";

/// Argument carrying the number of layers in one epoch.
pub const LAYERS_PER_EPOCH_ARG: &str = "layers-per-epoch";
/// Argument carrying the duration of one layer in seconds.
pub const LAYER_DURATION_ARG: &str = "layer-duration-sec";

static MEMORY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*([KkMmGg])(?:i)?[Bb]?$").ok());

/// Parse a memory size such as `512M`, `2Gi` or `1024KB` into megabytes.
///
/// Digits followed by a unit are required; a bare number is rejected since the
/// original unit cannot be known.
pub fn parse_memory_mb(value: &str) -> Result<u64> {
    let pattern = MEMORY_PATTERN
        .as_ref()
        .ok_or_else(|| Error::config("memory pattern failed to compile"))?;
    let caps = pattern
        .captures(value.trim())
        .ok_or_else(|| Error::config(format!("malformed memory size {value:?}")))?;

    let amount: u64 = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse()
        .map_err(|_| Error::config(format!("memory size {value:?} out of range")))?;
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    let mb = match unit {
        "K" | "k" => amount.div_ceil(1024),
        "M" | "m" => amount,
        "G" | "g" => amount
            .checked_mul(1024)
            .ok_or_else(|| Error::config(format!("memory size {value:?} out of range")))?,
        _ => return Err(Error::config(format!("unknown memory unit in {value:?}"))),
    };
    Ok(mb)
}

/// A scalar container argument value
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(v) => write!(f, "{v}"),
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::Text(v) => f.write_str(v),
        }
    }
}

/// Resource requests and limits, keyed by resource name (`cpu`, `memory`)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceSpec {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// One group of identical network nodes
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NodeSpec {
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default)]
    pub args: BTreeMap<String, ArgValue>,
    /// Timing-service image, only read for the bootstrap group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poet_image: Option<String>,
}

fn default_replicas() -> i32 {
    1
}

impl NodeSpec {
    /// Memory request of one pod in megabytes, 0 when not requested.
    pub fn memory_request_mb(&self) -> Result<u64> {
        self.resources
            .requests
            .get("memory")
            .map(|m| parse_memory_mb(m))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    /// Integer argument by name.
    pub fn arg_u64(&self, name: &str) -> Result<u64> {
        match self.args.get(name) {
            Some(ArgValue::Int(v)) if *v >= 0 => Ok(*v as u64),
            Some(ArgValue::Text(v)) => v
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("argument {name}={v:?} is not an integer"))),
            Some(other) => Err(Error::config(format!(
                "argument {name}={other} is not a non-negative integer"
            ))),
            None => Err(Error::config(format!("missing argument {name}"))),
        }
    }

    /// Arguments rendered as `--key=value` in key order.
    pub fn render_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|(k, v)| format!("--{k}={v}"))
            .collect()
    }

    pub fn poet_image(&self) -> &str {
        self.poet_image.as_deref().unwrap_or(DEFAULT_POET_IMAGE)
    }

    fn validate(&self, group: &str) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::config(format!("{group}.image is empty")));
        }
        if self.replicas < 1 {
            return Err(Error::config(format!(
                "{group}.replicas must be at least 1, got {}",
                self.replicas
            )));
        }
        self.memory_request_mb()
            .map_err(|e| Error::config(format!("{group}.resources: {e}")))?;
        Ok(())
    }
}

/// Optional second client group with its own image policy
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ClientV2Spec {
    /// Keep this group's image when an image override is set.
    #[serde(default)]
    pub noreplace: bool,
    #[serde(flatten)]
    pub node: NodeSpec,
}

/// Compute pool sizing
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NodePoolSpec {
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    /// Allocatable memory of one pool node.
    #[serde(default = "default_node_memory")]
    pub node_memory: String,
    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: u32,
}

fn default_machine_type() -> String {
    "n1-standard-4".to_string()
}

fn default_node_memory() -> String {
    "15G".to_string()
}

fn default_disk_size_gb() -> u32 {
    100
}

impl Default for NodePoolSpec {
    fn default() -> Self {
        Self {
            machine_type: default_machine_type(),
            node_memory: default_node_memory(),
            disk_size_gb: default_disk_size_gb(),
        }
    }
}

/// Complete description of one test network
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NetworkConfig {
    /// Requested namespace; empty means generate one.
    pub namespace: String,
    pub bootstrap: NodeSpec,
    pub client: NodeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientv2: Option<ClientV2Spec>,
    /// Seconds from the start of bootstrap deployment until genesis.
    pub genesis_delta: u64,
    /// Seconds allowed for each node group to become ready.
    pub deployment_ready_time_out: u64,
    #[serde(default)]
    pub node_pool: NodePoolSpec,
}

impl NetworkConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_yaml(&raw)?;
        info!(path = %path.display(), "Loaded network config");
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: NetworkConfig =
            serde_yaml::from_str(raw).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bootstrap.validate("bootstrap")?;
        self.client.validate("client")?;
        if let Some(v2) = &self.clientv2 {
            v2.node.validate("clientv2")?;
        }
        if self.deployment_ready_time_out == 0 {
            return Err(Error::config("deployment_ready_time_out must be positive"));
        }
        parse_memory_mb(&self.node_pool.node_memory)
            .map_err(|e| Error::config(format!("node_pool.node_memory: {e}")))?;
        Ok(())
    }

    pub fn genesis_delta(&self) -> Duration {
        Duration::from_secs(self.genesis_delta)
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.deployment_ready_time_out)
    }

    /// Replace node images with `image`.
    ///
    /// `bootstrap` and `client` always follow the override; `clientv2` follows
    /// it unless it sets `noreplace`. An empty override changes nothing.
    pub fn apply_image_override(&mut self, image: &str) {
        if image.is_empty() {
            return;
        }
        info!(image = %image, "Overriding node images");
        self.bootstrap.image = image.to_string();
        self.client.image = image.to_string();

        if let Some(v2) = self.clientv2.as_mut() {
            if v2.noreplace {
                info!("Keeping clientv2 image, noreplace is set");
            } else {
                v2.node.image = image.to_string();
            }
        }
    }

    /// Node groups deployed for this network, in deployment order.
    pub fn node_groups(&self) -> impl Iterator<Item = &NodeSpec> {
        [Some(&self.bootstrap), Some(&self.client)]
            .into_iter()
            .chain(std::iter::once(self.clientv2.as_ref().map(|v| &v.node)))
            .flatten()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
namespace: ""
genesis_delta: 60
deployment_ready_time_out: 120
bootstrap:
  image: node:develop
  resources:
    requests:
      memory: 1024M
  args:
    layers-per-epoch: 3
    layer-duration-sec: "30"
client:
  image: node:develop
  replicas: 4
  resources:
    requests:
      memory: 2G
  args:
    layers-per-epoch: 3
    layer-duration-sec: 30
    randcon: 8
    hare-enabled: true
clientv2:
  image: node:v2
  noreplace: true
  replicas: 2
"#;

    #[test]
    fn test_parse_config() {
        let config = NetworkConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.namespace, "");
        assert_eq!(config.genesis_delta(), Duration::from_secs(60));
        assert_eq!(config.deployment_timeout(), Duration::from_secs(120));
        assert_eq!(config.bootstrap.replicas, 1);
        assert_eq!(config.client.replicas, 4);
        let v2 = config.clientv2.as_ref().unwrap();
        assert!(v2.noreplace);
        assert_eq!(v2.node.image, "node:v2");
        assert_eq!(config.node_pool, NodePoolSpec::default());
        assert_eq!(config.node_groups().count(), 3);
    }

    #[test]
    fn test_layer_args_accept_ints_and_strings() {
        let config = NetworkConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.bootstrap.arg_u64(LAYERS_PER_EPOCH_ARG).unwrap(), 3);
        assert_eq!(config.bootstrap.arg_u64(LAYER_DURATION_ARG).unwrap(), 30);
        assert!(config.bootstrap.arg_u64("missing").is_err());
    }

    #[test]
    fn test_render_args_sorted() {
        let config = NetworkConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(
            config.client.render_args(),
            vec![
                "--hare-enabled=true",
                "--layer-duration-sec=30",
                "--layers-per-epoch=3",
                "--randcon=8",
            ]
        );
    }

    #[test]
    fn test_missing_required_key() {
        let raw = CONFIG.replace("genesis_delta: 60\n", "");
        let err = NetworkConfig::from_yaml(&raw).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("genesis_delta")));
    }

    #[test]
    fn test_malformed_memory_rejected() {
        let raw = CONFIG.replace("memory: 2G", "memory: lots");
        let err = NetworkConfig::from_yaml(&raw).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("client.resources")));
    }

    #[test]
    fn test_zero_replicas_rejected() {
        let raw = CONFIG.replace("replicas: 4", "replicas: 0");
        assert!(NetworkConfig::from_yaml(&raw).is_err());
    }

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory_mb("512M").unwrap(), 512);
        assert_eq!(parse_memory_mb("512Mi").unwrap(), 512);
        assert_eq!(parse_memory_mb("512MB").unwrap(), 512);
        assert_eq!(parse_memory_mb("2G").unwrap(), 2048);
        assert_eq!(parse_memory_mb("2Gi").unwrap(), 2048);
        assert_eq!(parse_memory_mb("1536K").unwrap(), 2);
        assert!(parse_memory_mb("512").is_err());
        assert!(parse_memory_mb("M512").is_err());
        assert!(parse_memory_mb("").is_err());
        assert!(parse_memory_mb("12T").is_err());
    }

    #[test]
    fn test_image_override_replaces_all_groups() {
        let mut config = NetworkConfig::from_yaml(&CONFIG.replace("noreplace: true", "")).unwrap();
        config.apply_image_override("node:pr-42");
        assert_eq!(config.bootstrap.image, "node:pr-42");
        assert_eq!(config.client.image, "node:pr-42");
        assert_eq!(config.clientv2.unwrap().node.image, "node:pr-42");
    }

    #[test]
    fn test_image_override_respects_noreplace() {
        let mut config = NetworkConfig::from_yaml(CONFIG).unwrap();
        config.apply_image_override("node:pr-42");
        assert_eq!(config.bootstrap.image, "node:pr-42");
        assert_eq!(config.client.image, "node:pr-42");
        assert_eq!(config.clientv2.unwrap().node.image, "node:v2");
    }

    #[test]
    fn test_empty_override_is_noop() {
        let mut config = NetworkConfig::from_yaml(CONFIG).unwrap();
        let before = config.clone();
        config.apply_image_override("");
        assert_eq!(config, before);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = NetworkConfig::load(&path).unwrap();
        assert_eq!(config.client.replicas, 4);

        let err = NetworkConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
