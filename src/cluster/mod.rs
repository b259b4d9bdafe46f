//! Cluster capability interface.
//!
//! The lifecycle talks to Kubernetes only through [`ClusterOps`], which covers
//! exactly the primitives it needs: namespace list/create, resource creation,
//! pod listing and logs, workload status, and service addresses.
//! [`KubeCluster`] implements it over kube-rs; tests substitute fakes.

mod kube_cluster;
pub mod port_forward;

pub use kube_cluster::{KubeCluster, MANAGED_BY_LABEL, MANAGED_BY_VALUE, load_client};
pub use port_forward::KubeTimingService;

use std::fmt;
use std::future::Future;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};

use crate::environment::error::Result;

/// A pod as seen by the lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub ip: String,
    pub ready: bool,
}

/// A namespaced object the lifecycle creates
#[derive(Clone, Debug)]
pub enum Manifest {
    ConfigMap(ConfigMap),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    DaemonSet(DaemonSet),
}

impl Manifest {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Manifest::ConfigMap(_) => WorkloadKind::ConfigMap,
            Manifest::Service(_) => WorkloadKind::Service,
            Manifest::StatefulSet(_) => WorkloadKind::StatefulSet,
            Manifest::Deployment(_) => WorkloadKind::Deployment,
            Manifest::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    pub fn name(&self) -> &str {
        let name = match self {
            Manifest::ConfigMap(o) => &o.metadata.name,
            Manifest::Service(o) => &o.metadata.name,
            Manifest::StatefulSet(o) => &o.metadata.name,
            Manifest::Deployment(o) => &o.metadata.name,
            Manifest::DaemonSet(o) => &o.metadata.name,
        };
        name.as_deref().unwrap_or_default()
    }
}

/// Kinds of objects the lifecycle creates or inspects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    ConfigMap,
    Service,
    StatefulSet,
    Deployment,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reference to a replicated workload
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(kind: WorkloadKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Desired and ready replica counts of a workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicaCounts {
    pub desired: i32,
    pub ready: i32,
}

impl ReplicaCounts {
    pub fn new(desired: i32, ready: i32) -> Self {
        Self { desired, ready }
    }

    /// Serving: at least one replica wanted and all of them ready.
    pub fn is_serving(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}

/// Cluster primitives consumed by the lifecycle.
pub trait ClusterOps: Send + Sync {
    /// Names of all namespaces on the cluster.
    fn list_namespaces(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Create a namespace.
    fn create_namespace(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Create an object in `namespace`.
    fn create(&self, namespace: &str, manifest: &Manifest)
    -> impl Future<Output = Result<()>> + Send;

    /// Pods in `namespace` matching a label selector.
    fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<PodInfo>>> + Send;

    /// Current log of one container.
    fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Replica counts of a workload, `None` if it does not exist yet.
    fn workload_status(
        &self,
        namespace: &str,
        workload: &WorkloadRef,
    ) -> impl Future<Output = Result<Option<ReplicaCounts>>> + Send;

    /// Externally reachable address of a service, `None` if not assigned.
    fn service_address(
        &self,
        namespace: &str,
        service: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// The bootstrap node's timing service.
pub trait TimingService: Send + Sync {
    /// POST `body` to the start endpoint of the timing service in `pod` and
    /// return the raw response body.
    fn initialize(
        &self,
        namespace: &str,
        pod: &PodInfo,
        body: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}
