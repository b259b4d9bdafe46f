//! kube-rs implementation of [`ClusterOps`].

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Service};
use kube::api::{Api, ListParams, LogParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, instrument};

use crate::cluster::{ClusterOps, Manifest, PodInfo, ReplicaCounts, WorkloadKind, WorkloadRef};
use crate::config::KubeCredentials;
use crate::environment::error::{Error, Result};

/// Label marking namespaces created by the harness.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "testnet-harness";

/// Build a client from the kubeconfig, falling back to in-cluster credentials.
///
/// The kubeconfig file wins when it exists; its optional context selects the
/// cluster. Without the file, the in-cluster service account is tried, and
/// when that also fails the result is `Error::CredentialsNotFound`.
pub async fn load_client(credentials: &KubeCredentials) -> Result<Client> {
    let path = credentials.kubeconfig.display().to_string();

    let config = if credentials.kubeconfig.is_file() {
        info!(
            kubeconfig = %path,
            context = credentials.context.as_deref().unwrap_or("<current>"),
            "Loading kubeconfig"
        );
        let kubeconfig = Kubeconfig::read_from(&credentials.kubeconfig).map_err(|e| {
            Error::CredentialsNotFound {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        let options = KubeConfigOptions {
            context: credentials.context.clone(),
            ..Default::default()
        };
        Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::CredentialsNotFound {
                path: path.clone(),
                reason: e.to_string(),
            })?
    } else {
        info!(kubeconfig = %path, "Kubeconfig not found, loading in-cluster config");
        Config::incluster().map_err(|e| Error::CredentialsNotFound {
            path: path.clone(),
            reason: e.to_string(),
        })?
    };

    Ok(Client::try_from(config)?)
}

/// Cluster access over a kube-rs client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(credentials: &KubeCredentials) -> Result<Self> {
        let client = load_client(credentials).await?;
        let version = client.apiserver_version().await?;
        info!(
            platform = %version.platform,
            version = %version.git_version,
            "Connected to Kubernetes cluster"
        );
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Pod is ready when its `Ready` condition is `True`.
fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn to_pod_info(pod: &Pod) -> PodInfo {
    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        ip: pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default(),
        ready: pod_is_ready(pod),
    }
}

fn statefulset_counts(sts: &StatefulSet) -> ReplicaCounts {
    ReplicaCounts::new(
        sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        sts.status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
    )
}

fn deployment_counts(deployment: &Deployment) -> ReplicaCounts {
    ReplicaCounts::new(
        deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
    )
}

fn daemonset_counts(ds: &DaemonSet) -> ReplicaCounts {
    ds.status
        .as_ref()
        .map(|s| ReplicaCounts::new(s.desired_number_scheduled, s.number_ready))
        .unwrap_or_default()
}

fn service_address_of(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.iter().find_map(|i| i.ip.clone().or(i.hostname.clone())));

    ingress.or_else(|| {
        service
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone())
            .filter(|ip| !ip.is_empty() && ip != "None")
    })
}

impl ClusterOps for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }

    #[instrument(skip(self, manifest), fields(kind = %manifest.kind(), name = %manifest.name()))]
    async fn create(&self, namespace: &str, manifest: &Manifest) -> Result<()> {
        let pp = PostParams::default();
        match manifest {
            Manifest::ConfigMap(o) => {
                self.api::<ConfigMap>(namespace).create(&pp, o).await?;
            }
            Manifest::Service(o) => {
                self.api::<Service>(namespace).create(&pp, o).await?;
            }
            Manifest::StatefulSet(o) => {
                self.api::<StatefulSet>(namespace).create(&pp, o).await?;
            }
            Manifest::Deployment(o) => {
                self.api::<Deployment>(namespace).create(&pp, o).await?;
            }
            Manifest::DaemonSet(o) => {
                self.api::<DaemonSet>(namespace).create(&pp, o).await?;
            }
        }
        debug!("Created object");
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let pods = self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pods.items.iter().map(to_pod_info).collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        Ok(self.api::<Pod>(namespace).logs(pod, &params).await?)
    }

    async fn workload_status(
        &self,
        namespace: &str,
        workload: &WorkloadRef,
    ) -> Result<Option<ReplicaCounts>> {
        let name = workload.name.as_str();
        let counts = match workload.kind {
            WorkloadKind::StatefulSet => self
                .api::<StatefulSet>(namespace)
                .get_opt(name)
                .await?
                .map(|o| statefulset_counts(&o)),
            WorkloadKind::Deployment => self
                .api::<Deployment>(namespace)
                .get_opt(name)
                .await?
                .map(|o| deployment_counts(&o)),
            WorkloadKind::DaemonSet => self
                .api::<DaemonSet>(namespace)
                .get_opt(name)
                .await?
                .map(|o| daemonset_counts(&o)),
            WorkloadKind::ConfigMap | WorkloadKind::Service => {
                return Err(Error::config(format!("{workload} has no replicas")));
            }
        };
        Ok(counts)
    }

    async fn service_address(&self, namespace: &str, service: &str) -> Result<Option<String>> {
        Ok(self
            .api::<Service>(namespace)
            .get_opt(service)
            .await?
            .as_ref()
            .and_then(service_address_of))
    }
}
