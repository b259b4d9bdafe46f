//! `KubeCluster` against a live API server.

use std::sync::Arc;
use std::time::Duration;

use testnet_harness::cluster::{ClusterOps, Manifest, PodInfo, WorkloadKind, WorkloadRef};
use testnet_harness::environment::genesis::GenesisSchedule;
use testnet_harness::environment::{Error, NamespaceProvisioner};
use testnet_harness::resources::common::pod_selector;
use testnet_harness::resources::logging::{ELASTICSEARCH, logging_stack};
use testnet_harness::resources::node::{NodePlacement, client_deployment};

use crate::common::{NetworkConfigBuilder, test_settings};
use crate::{SharedTestCluster, TestNamespace, init_tracing};

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_namespace_created_once() {
    init_tracing();
    let shared = SharedTestCluster::get().await;
    let cluster = Arc::new(shared.cluster());
    let ns = TestNamespace::reserve(cluster.client().clone(), "it-ns");

    let provisioner = NamespaceProvisioner::new(cluster.clone(), "it-ns");
    let created = provisioner.provision(Some(ns.name())).await.unwrap();
    assert_eq!(created, ns.name());
    assert!(cluster.list_namespaces().await.unwrap().contains(&created));

    let err = provisioner.provision(Some(ns.name())).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateResource { kind: "namespace", .. }));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_logging_stack_accepted() {
    init_tracing();
    let shared = SharedTestCluster::get().await;
    let cluster = Arc::new(shared.cluster());
    let ns = TestNamespace::reserve(cluster.client().clone(), "it-log");
    cluster.create_namespace(ns.name()).await.unwrap();

    for manifest in logging_stack(ns.name(), &test_settings().elastic) {
        cluster.create(ns.name(), &manifest).await.unwrap();
    }

    let es = WorkloadRef::new(WorkloadKind::StatefulSet, ELASTICSEARCH);
    let counts = cluster.workload_status(ns.name(), &es).await.unwrap();
    assert_eq!(counts.map(|c| c.desired), Some(1));

    // Missing workloads are reported as absent, not as errors
    let missing = WorkloadRef::new(WorkloadKind::Deployment, "no-such-deployment");
    assert!(cluster.workload_status(ns.name(), &missing).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_client_pods_listed_by_group() {
    init_tracing();
    let shared = SharedTestCluster::get().await;
    let cluster = Arc::new(shared.cluster());
    let ns = TestNamespace::reserve(cluster.client().clone(), "it-pods");
    cluster.create_namespace(ns.name()).await.unwrap();

    let config = NetworkConfigBuilder::new().clients(2).memory("64M").build();
    let schedule = GenesisSchedule::start(Duration::from_secs(60)).unwrap();
    let genesis = schedule.genesis_arg();
    let placement = NodePlacement {
        namespace: ns.name(),
        pool: None,
        genesis_time: &genesis,
    };
    let bootstrap = PodInfo {
        name: "bootstrap-0".to_string(),
        ip: "10.0.0.1".to_string(),
        ready: true,
    };
    let deployment = client_deployment(&placement, "client", &config.client, &bootstrap);
    cluster
        .create(ns.name(), &Manifest::Deployment(deployment))
        .await
        .unwrap();

    let mut pods = Vec::new();
    for _ in 0..30 {
        pods = cluster
            .list_pods(ns.name(), &pod_selector("client"))
            .await
            .unwrap();
        if pods.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(pods.len(), 2);
    assert!(
        cluster
            .list_pods(ns.name(), &pod_selector("bootstrap"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_elasticsearch_service_address() {
    init_tracing();
    let shared = SharedTestCluster::get().await;
    let cluster = Arc::new(shared.cluster());
    let ns = TestNamespace::reserve(cluster.client().clone(), "it-svc");
    cluster.create_namespace(ns.name()).await.unwrap();

    let stack = logging_stack(ns.name(), &test_settings().elastic);
    let service = stack
        .iter()
        .find(|m| m.kind() == WorkloadKind::Service && m.name() == ELASTICSEARCH)
        .unwrap();
    cluster.create(ns.name(), service).await.unwrap();

    let address = cluster.service_address(ns.name(), ELASTICSEARCH).await.unwrap();
    assert!(address.is_some_and(|a| !a.is_empty()));
    assert!(
        cluster
            .service_address(ns.name(), "no-such-service")
            .await
            .unwrap()
            .is_none()
    );
}
