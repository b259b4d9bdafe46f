//! Network node Deployments.
//!
//! The bootstrap Deployment runs the node next to the timing service (PoET);
//! client Deployments run only the node and are pointed at the bootstrap pod.
//! All node pods are pinned to the run's node pool when one was scaled.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements,
};

use crate::cluster::PodInfo;
use crate::config::NodeSpec;
use crate::resources::common::{
    NODE_POOL_LABEL, label_selector, object_meta, quantities, template_meta,
};

pub const BOOTSTRAP_GROUP: &str = "bootstrap";
pub const NODE_CONTAINER: &str = "node";
pub const POET_CONTAINER: &str = "poet";

pub const P2P_PORT: i32 = 7513;
pub const GRPC_PORT: i32 = 9092;
pub const POET_PORT: i32 = 80;

/// Placement and timing shared by every node group of a run
#[derive(Clone, Debug)]
pub struct NodePlacement<'a> {
    pub namespace: &'a str,
    /// Node pool the pods must land on.
    pub pool: Option<&'a str>,
    /// Genesis instant, RFC 3339.
    pub genesis_time: &'a str,
}

fn port(name: &str, container_port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port,
        ..Default::default()
    }
}

fn node_container(spec: &NodeSpec, genesis_time: &str, extra_args: Vec<String>) -> Container {
    let mut args = spec.render_args();
    args.push(format!("--genesis-time={genesis_time}"));
    args.extend(extra_args);

    Container {
        name: NODE_CONTAINER.to_string(),
        image: Some(spec.image.clone()),
        args: Some(args),
        ports: Some(vec![port("p2p", P2P_PORT), port("grpc", GRPC_PORT)]),
        resources: Some(ResourceRequirements {
            requests: quantities(&spec.resources.requests),
            limits: quantities(&spec.resources.limits),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn poet_container(spec: &NodeSpec) -> Container {
    Container {
        name: POET_CONTAINER.to_string(),
        image: Some(spec.poet_image().to_string()),
        args: Some(vec![
            format!("--restlisten=0.0.0.0:{POET_PORT}"),
            format!("--nodeaddr=127.0.0.1:{GRPC_PORT}"),
        ]),
        ports: Some(vec![port("rest", POET_PORT)]),
        ..Default::default()
    }
}

fn deployment(
    placement: &NodePlacement<'_>,
    group: &str,
    replicas: i32,
    containers: Vec<Container>,
) -> Deployment {
    let node_selector = placement
        .pool
        .map(|pool| BTreeMap::from([(NODE_POOL_LABEL.to_string(), pool.to_string())]));

    Deployment {
        metadata: object_meta(group, placement.namespace, group),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: label_selector(group),
            template: PodTemplateSpec {
                metadata: Some(template_meta(group)),
                spec: Some(PodSpec {
                    containers,
                    node_selector,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Bootstrap node plus its timing service.
pub fn bootstrap_deployment(placement: &NodePlacement<'_>, spec: &NodeSpec) -> Deployment {
    deployment(
        placement,
        BOOTSTRAP_GROUP,
        spec.replicas,
        vec![
            node_container(spec, placement.genesis_time, Vec::new()),
            poet_container(spec),
        ],
    )
}

/// Client group `group` wired to the bootstrap pod and its timing service.
pub fn client_deployment(
    placement: &NodePlacement<'_>,
    group: &str,
    spec: &NodeSpec,
    bootstrap: &PodInfo,
) -> Deployment {
    let extra = vec![
        format!("--bootstrap={}:{P2P_PORT}", bootstrap.ip),
        format!("--poet-server={}:{POET_PORT}", bootstrap.ip),
    ];
    deployment(
        placement,
        group,
        spec.replicas,
        vec![node_container(spec, placement.genesis_time, extra)],
    )
}
