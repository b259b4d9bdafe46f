// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for testnet-harness.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components through the public API.

mod config_tests {
    use std::io::Write;
    use std::time::Duration;

    use testnet_harness::config::{ArgValue, NetworkConfig};

    const MINIMAL: &str = r#"
namespace: ""
genesis_delta: 90
deployment_ready_time_out: 300
bootstrap:
  image: node:develop
client:
  image: node:develop
  replicas: 20
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = NetworkConfig::load(file.path()).unwrap();
        assert_eq!(config.genesis_delta(), Duration::from_secs(90));
        assert_eq!(config.deployment_timeout(), Duration::from_secs(300));
        assert_eq!(config.client.replicas, 20);
        assert!(config.clientv2.is_none());
        assert_eq!(config.bootstrap.poet_image(), "spacemeshos/poet:develop");
    }

    #[test]
    fn test_load_missing_file() {
        let err = NetworkConfig::load("/nonexistent/network.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/network.yaml"));
    }

    #[test]
    fn test_zero_replicas_rejected() {
        let yaml = MINIMAL.replace("replicas: 20", "replicas: 0");
        let err = NetworkConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("client.replicas"));
    }

    #[test]
    fn test_empty_image_rejected() {
        let yaml = MINIMAL.replacen("image: node:develop", "image: \"\"", 1);
        let err = NetworkConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("bootstrap.image"));
    }

    #[test]
    fn test_bare_memory_request_rejected() {
        let yaml = format!("{MINIMAL}  resources:\n    requests:\n      memory: \"512\"\n");
        assert!(NetworkConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_arg_values_keep_their_type() {
        let yaml = format!(
            "{MINIMAL}  args:\n    hare-enabled: true\n    ratio: 0.5\n    coinbase: \"0x1234\"\n"
        );
        let config = NetworkConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.client.args["hare-enabled"], ArgValue::Bool(true));
        assert_eq!(config.client.args["ratio"], ArgValue::Float(0.5));
        assert_eq!(
            config.client.args["coinbase"],
            ArgValue::Text("0x1234".to_string())
        );
    }

    #[test]
    fn test_empty_override_changes_nothing() {
        let mut config = NetworkConfig::from_yaml(MINIMAL).unwrap();
        let before = config.clone();
        config.apply_image_override("");
        assert_eq!(config, before);
    }
}

mod settings_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use testnet_harness::config::HarnessSettings;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("CLUSTER_ZONE", "europe-west4-a"),
        ("PROJECT_ID", "testnets"),
        ("CLUSTER_NAME", "nightly"),
        ("ES_PASS_LOCAL", "pw"),
        ("MAIN_ES_IP", "10.0.0.9"),
    ];

    #[test]
    fn test_required_only() {
        let settings = HarnessSettings::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(settings.operator, "harness");
        assert_eq!(settings.cloud.cluster_zone, "europe-west4-a");
        assert_eq!(settings.queues.teardown_zone, "europe-west4");
        assert_eq!(settings.queues.teardown_queue, "teardown");
        assert_eq!(settings.queues.dump_queue, "dump");
        assert_eq!(settings.timeouts.poll_interval, Duration::from_secs(5));
        assert!(settings.cloud.access_token.is_none());
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CLIENT_DOCKER_IMAGE", "   "));
        pairs.push(("TD_QUEUE_NAME", ""));
        let settings = HarnessSettings::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(settings.image_override, "");
        assert_eq!(settings.queues.teardown_queue, "teardown");
    }

    #[test]
    fn test_missing_es_password() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "ES_PASS_LOCAL")
            .collect();
        let err = HarnessSettings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("ES_PASS_LOCAL"));
    }
}

mod error_tests {
    use std::error::Error as _;
    use std::time::Duration;

    use testnet_harness::environment::{Error, LifecycleState, PhaseFailure};

    #[test]
    fn test_phase_failure_display_and_source() {
        let failure = PhaseFailure::new(
            LifecycleState::BootstrapReady,
            Error::DependencyNotReady {
                pod: "bootstrap-0".to_string(),
                phrase: "REST proxy start listening on 0.0.0.0:80",
                timeout: Duration::from_secs(120),
            },
        );
        let text = failure.to_string();
        assert!(text.contains("BootstrapReady"));
        assert!(text.contains("bootstrap-0"));
        assert!(failure.source().is_some());
    }

    #[test]
    fn test_initialization_display() {
        let err = Error::Initialization {
            response: "busy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "timing service initialization returned \"busy\", expected {}"
        );
    }

    #[test]
    fn test_cloud_errors_not_retryable() {
        assert!(!Error::cloud("quota").is_retryable());
        assert!(!Error::config("bad").is_retryable());
    }
}

mod hint_tests {
    use testnet_harness::environment::LifecycleState;
    use testnet_harness::environment::diagnostic_hints::DiagnosticHint;

    #[test]
    fn test_hints_mention_namespace() {
        for phase in [
            LifecycleState::Provisioning,
            LifecycleState::LoggingReady,
            LifecycleState::PoolScaled,
            LifecycleState::BootstrapReady,
            LifecycleState::ClientsReady,
        ] {
            let hint = DiagnosticHint::for_phase(phase, "alice-k3j9x0qa");
            assert!(!hint.commands.is_empty(), "{phase} has no commands");
            assert!(hint.to_string().contains("alice-k3j9x0qa"), "{phase}");
        }
    }
}

mod resource_tests {
    use testnet_harness::cluster::{Manifest, WorkloadKind};
    use testnet_harness::config::ElasticSettings;
    use testnet_harness::resources::logging::{elasticsearch_dns, logging_stack, logging_workloads};

    fn elastic() -> ElasticSettings {
        ElasticSettings {
            user: "elastic".to_string(),
            password: "pw".to_string(),
            main_es_ip: "10.0.0.9".to_string(),
        }
    }

    #[test]
    fn test_logging_stack_namespaced() {
        let stack = logging_stack("ns-1", &elastic());
        assert_eq!(stack.len(), 6);
        for manifest in &stack {
            let namespace = match manifest {
                Manifest::ConfigMap(o) => o.metadata.namespace.clone(),
                Manifest::Service(o) => o.metadata.namespace.clone(),
                Manifest::StatefulSet(o) => o.metadata.namespace.clone(),
                Manifest::Deployment(o) => o.metadata.namespace.clone(),
                Manifest::DaemonSet(o) => o.metadata.namespace.clone(),
            };
            assert_eq!(namespace.as_deref(), Some("ns-1"), "{}", manifest.name());
        }
    }

    #[test]
    fn test_awaited_workloads() {
        let kinds: Vec<_> = logging_workloads().iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&WorkloadKind::StatefulSet));
        assert!(kinds.contains(&WorkloadKind::DaemonSet));
        assert!(kinds.contains(&WorkloadKind::Deployment));
    }

    #[test]
    fn test_elasticsearch_dns() {
        assert_eq!(
            elasticsearch_dns("ns-1"),
            "elasticsearch.ns-1.svc.cluster.local"
        );
    }
}
