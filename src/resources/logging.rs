//! Per-namespace logging stack: Elasticsearch, Fluent Bit and Kibana.
//!
//! Fluent Bit tails container logs on every node and ships them to the
//! namespace's Elasticsearch with daily `logstash-%Y.%m.%d` indices, which is
//! what the failure dump copies out.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction,
    HostPathVolumeSource, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service,
    ServicePort, ServiceSpec, TCPSocketAction, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::cluster::{Manifest, WorkloadKind, WorkloadRef};
use crate::config::ElasticSettings;
use crate::resources::common::{label_selector, object_meta, selector_labels, template_meta};

pub const ELASTICSEARCH: &str = "elasticsearch";
pub const FLUENT_BIT: &str = "fluent-bit";
pub const KIBANA: &str = "kibana";

const ELASTICSEARCH_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch:7.5.0";
const FLUENT_BIT_IMAGE: &str = "fluent/fluent-bit:1.3";
const KIBANA_IMAGE: &str = "docker.elastic.co/kibana/kibana:7.5.0";

pub const ELASTICSEARCH_PORT: i32 = 9200;
const KIBANA_PORT: i32 = 5601;

/// Every object of the stack in creation order: indexer, collector, dashboard.
pub fn logging_stack(namespace: &str, elastic: &ElasticSettings) -> Vec<Manifest> {
    vec![
        Manifest::Service(elasticsearch_service(namespace)),
        Manifest::StatefulSet(elasticsearch_statefulset(namespace, &elastic.password)),
        Manifest::ConfigMap(fluent_bit_configmap(namespace, elastic)),
        Manifest::DaemonSet(fluent_bit_daemonset(namespace)),
        Manifest::Service(kibana_service(namespace)),
        Manifest::Deployment(kibana_deployment(namespace, elastic)),
    ]
}

/// Workloads that must all be serving before the stack counts as ready.
pub fn logging_workloads() -> [WorkloadRef; 3] {
    [
        WorkloadRef::new(WorkloadKind::StatefulSet, ELASTICSEARCH),
        WorkloadRef::new(WorkloadKind::DaemonSet, FLUENT_BIT),
        WorkloadRef::new(WorkloadKind::Deployment, KIBANA),
    ]
}

/// In-cluster DNS name of the namespace's Elasticsearch.
pub fn elasticsearch_dns(namespace: &str) -> String {
    format!("{ELASTICSEARCH}.{namespace}.svc.cluster.local")
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn http_probe(port: i32, path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(5),
        ..Default::default()
    }
}

fn service(namespace: &str, name: &str, port: i32, type_: &str) -> Service {
    Service {
        metadata: object_meta(name, namespace, name),
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Exposed through a load balancer so the dump worker can read it.
pub fn elasticsearch_service(namespace: &str) -> Service {
    service(namespace, ELASTICSEARCH, ELASTICSEARCH_PORT, "LoadBalancer")
}

pub fn elasticsearch_statefulset(namespace: &str, password: &str) -> StatefulSet {
    let container = Container {
        name: ELASTICSEARCH.to_string(),
        image: Some(ELASTICSEARCH_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: ELASTICSEARCH_PORT,
            name: Some("http".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            env("discovery.type", "single-node"),
            env("xpack.security.enabled", "true"),
            env("ELASTIC_PASSWORD", password),
            env("ES_JAVA_OPTS", "-Xms2g -Xmx2g"),
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("memory".to_string(), Quantity("4Gi".to_string())),
                ("cpu".to_string(), Quantity("1".to_string())),
            ])),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(ELASTICSEARCH_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(20),
            period_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: object_meta(ELASTICSEARCH, namespace, ELASTICSEARCH),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: Some(ELASTICSEARCH.to_string()),
            selector: label_selector(ELASTICSEARCH),
            template: PodTemplateSpec {
                metadata: Some(template_meta(ELASTICSEARCH)),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn fluent_bit_config(elastic: &ElasticSettings) -> String {
    format!(
        r#"[SERVICE]
    Flush        5
    Log_Level    info
    Parsers_File parsers.conf

[INPUT]
    Name             tail
    Path             /var/log/containers/*.log
    Parser           docker
    Tag              kube.*
    Mem_Buf_Limit    5MB
    Skip_Long_Lines  On

[FILTER]
    Name   kubernetes
    Match  kube.*
    Merge_Log On

[OUTPUT]
    Name            es
    Match           *
    Host            {ELASTICSEARCH}
    Port            {ELASTICSEARCH_PORT}
    HTTP_User       {user}
    HTTP_Passwd     {password}
    Logstash_Format On
    Logstash_DateFormat %Y.%m.%d
    Retry_Limit     False
"#,
        user = elastic.user,
        password = elastic.password,
    )
}

const FLUENT_BIT_PARSERS: &str = r#"[PARSER]
    Name        docker
    Format      json
    Time_Key    time
    Time_Format %Y-%m-%dT%H:%M:%S.%L
    Time_Keep   On
"#;

pub fn fluent_bit_configmap(namespace: &str, elastic: &ElasticSettings) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(FLUENT_BIT, namespace, FLUENT_BIT),
        data: Some(BTreeMap::from([
            ("fluent-bit.conf".to_string(), fluent_bit_config(elastic)),
            ("parsers.conf".to_string(), FLUENT_BIT_PARSERS.to_string()),
        ])),
        ..Default::default()
    }
}

/// Collector on every node, including the tainted pool nodes.
pub fn fluent_bit_daemonset(namespace: &str) -> DaemonSet {
    let host_path = |name: &str, path: &str| Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = |name: &str, path: &str, read_only: bool| VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    };

    DaemonSet {
        metadata: object_meta(FLUENT_BIT, namespace, FLUENT_BIT),
        spec: Some(DaemonSetSpec {
            selector: label_selector(FLUENT_BIT),
            template: PodTemplateSpec {
                metadata: Some(template_meta(FLUENT_BIT)),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: FLUENT_BIT.to_string(),
                        image: Some(FLUENT_BIT_IMAGE.to_string()),
                        volume_mounts: Some(vec![
                            mount("varlog", "/var/log", true),
                            mount("containers", "/var/lib/docker/containers", true),
                            mount("config", "/fluent-bit/etc/", false),
                        ]),
                        ..Default::default()
                    }],
                    tolerations: Some(vec![Toleration {
                        operator: Some("Exists".to_string()),
                        ..Default::default()
                    }]),
                    volumes: Some(vec![
                        host_path("varlog", "/var/log"),
                        host_path("containers", "/var/lib/docker/containers"),
                        Volume {
                            name: "config".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: FLUENT_BIT.to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn kibana_service(namespace: &str) -> Service {
    service(namespace, KIBANA, KIBANA_PORT, "LoadBalancer")
}

pub fn kibana_deployment(namespace: &str, elastic: &ElasticSettings) -> Deployment {
    Deployment {
        metadata: object_meta(KIBANA, namespace, KIBANA),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: label_selector(KIBANA),
            template: PodTemplateSpec {
                metadata: Some(template_meta(KIBANA)),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: KIBANA.to_string(),
                        image: Some(KIBANA_IMAGE.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: KIBANA_PORT,
                            name: Some("http".to_string()),
                            ..Default::default()
                        }]),
                        env: Some(vec![
                            env(
                                "ELASTICSEARCH_HOSTS",
                                format!("http://{ELASTICSEARCH}:{ELASTICSEARCH_PORT}"),
                            ),
                            env("ELASTICSEARCH_USERNAME", elastic.user.clone()),
                            env("ELASTICSEARCH_PASSWORD", elastic.password.clone()),
                        ]),
                        readiness_probe: Some(http_probe(KIBANA_PORT, "/api/status")),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
