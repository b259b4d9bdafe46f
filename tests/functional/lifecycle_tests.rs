//! Complete runs through the lifecycle coordinator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use testnet_harness::cluster::WorkloadKind;
use testnet_harness::config::{HarnessSettings, NetworkConfig};
use testnet_harness::environment::deployment::POET_START_BODY;
use testnet_harness::environment::{
    EnvironmentLifecycle, Error, LifecycleState, SetupOutcome,
};
use testnet_harness::scenario::{
    Scenario, ScenarioFailure, ScenarioOutcome, ScenarioSuite, network_liveness,
};

use crate::common::{NetworkConfigBuilder, test_settings};
use crate::mock_cluster::{FakeCluster, FakePools, FakeTiming, RecordingQueue, Timeline};

type TestLifecycle = EnvironmentLifecycle<FakeCluster, FakePools, RecordingQueue, FakeTiming>;

struct Harness {
    cluster: Arc<FakeCluster>,
    pools: Arc<FakePools>,
    queue: Arc<RecordingQueue>,
    timing: Arc<FakeTiming>,
    lifecycle: TestLifecycle,
}

impl Harness {
    fn new(config: NetworkConfig, settings: HarnessSettings, cluster: FakeCluster) -> Self {
        Self::with(config, settings, cluster, RecordingQueue::default(), FakeTiming::default())
    }

    fn with(
        config: NetworkConfig,
        settings: HarnessSettings,
        cluster: FakeCluster,
        queue: RecordingQueue,
        timing: FakeTiming,
    ) -> Self {
        let cluster = Arc::new(cluster);
        let pools = Arc::new(FakePools::default());
        let queue = Arc::new(queue);
        let timing = Arc::new(timing);
        let lifecycle = EnvironmentLifecycle::new(
            config,
            settings,
            cluster.clone(),
            pools.clone(),
            queue.clone(),
            timing.clone(),
        );
        Self {
            cluster,
            pools,
            queue,
            timing,
            lifecycle,
        }
    }
}

/// Scenario recording how long after `origin` it started.
fn timed_scenario(origin: Instant, started: Arc<Mutex<Option<Duration>>>) -> Scenario {
    Scenario::new("timed", move |_env| {
        let started = started.clone();
        async move {
            *started.lock().unwrap() = Some(origin.elapsed());
            Ok(())
        }
    })
}

fn passing(name: &str) -> Scenario {
    Scenario::new(name, |_env| async { Ok(()) })
}

const FULL_RUN: [LifecycleState; 10] = [
    LifecycleState::NotStarted,
    LifecycleState::Provisioning,
    LifecycleState::LoggingReady,
    LifecycleState::PoolScaled,
    LifecycleState::BootstrapReady,
    LifecycleState::ClientsReady,
    LifecycleState::GenesisSynced,
    LifecycleState::Running,
    LifecycleState::Reporting,
    LifecycleState::Done,
];

// ============================================================================
// Happy path
// ============================================================================

/// Bootstrap ready at 10s, phrase at 12s, clients ready at 40s, genesis delta
/// 60s: setup sleeps the remaining 20s and scenarios start at exactly 60s.
#[tokio::test(start_paused = true)]
async fn test_full_run_waits_out_genesis() {
    let config = NetworkConfigBuilder::new().genesis_delta(60).build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let origin = Instant::now();
    let started = Arc::new(Mutex::new(None));
    let suite = ScenarioSuite::new("network").with(timed_scenario(origin, started.clone()));

    let report = h.lifecycle.run(&suite).await.unwrap();

    assert!(report.success());
    assert!(!report.skipped);
    assert_eq!(report.scenarios.len(), 1);
    assert_eq!(report.scenarios[0].outcome, ScenarioOutcome::Passed);
    assert_eq!(*started.lock().unwrap(), Some(Duration::from_secs(60)));
    assert_eq!(h.lifecycle.history(), FULL_RUN.as_slice());
    assert_eq!(h.lifecycle.state(), LifecycleState::Done);
}

/// Clients ready after the genesis instant: no extra sleep.
#[tokio::test(start_paused = true)]
async fn test_slow_clients_skip_genesis_sleep() {
    let config = NetworkConfigBuilder::new().genesis_delta(30).build();
    let timeline = Timeline {
        clients_ready: Duration::from_secs(45),
        ..Timeline::default()
    };
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(timeline));

    let origin = Instant::now();
    let started = Arc::new(Mutex::new(None));
    let suite = ScenarioSuite::new("network").with(timed_scenario(origin, started.clone()));

    let report = h.lifecycle.run(&suite).await.unwrap();

    assert!(report.success());
    assert_eq!(*started.lock().unwrap(), Some(Duration::from_secs(45)));
}

#[tokio::test(start_paused = true)]
async fn test_generated_namespace_holds_everything() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let report = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    let namespace = report.namespace.clone().unwrap();
    let suffix = namespace.strip_prefix("tester-").unwrap();
    assert_eq!(suffix.len(), 8);
    assert_eq!(h.cluster.namespaces(), vec![namespace.clone()]);
    assert_eq!(h.lifecycle.namespace(), Some(namespace.as_str()));
    assert_eq!(h.lifecycle.run_id(), namespace);

    let created = h.cluster.created();
    assert!(created.iter().all(|c| c.namespace == namespace));

    // Logging stack first, then bootstrap, then clients
    let names: Vec<_> = created.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "elasticsearch",
            "elasticsearch",
            "fluent-bit",
            "fluent-bit",
            "kibana",
            "kibana",
            "bootstrap",
            "client",
        ]
    );
    assert_eq!(created[6].kind, WorkloadKind::Deployment);
}

#[tokio::test(start_paused = true)]
async fn test_requested_namespace_is_used() {
    let config = NetworkConfigBuilder::new().namespace("nightly-run").build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let report = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    assert_eq!(report.namespace.as_deref(), Some("nightly-run"));
    assert_eq!(h.pools.requests.lock().unwrap()[0].name, "pool-nightly-run");
}

/// Six pods of 2G on 4G nodes need three nodes.
#[tokio::test(start_paused = true)]
async fn test_pool_sized_from_requested_memory() {
    let config = NetworkConfigBuilder::new()
        .namespace("sizing")
        .clients(5)
        .memory("2G")
        .node_memory("4G")
        .build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    h.lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    let requests = h.pools.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].nodes, 3);
    assert_eq!(requests[0].machine_type, "n1-standard-4");
}

#[tokio::test(start_paused = true)]
async fn test_clients_point_at_bootstrap_and_share_genesis() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    h.lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    let bootstrap_args = h.cluster.args_of("bootstrap");
    let client_args = h.cluster.args_of("client");
    let genesis = |args: &[String]| {
        args.iter()
            .find(|a| a.starts_with("--genesis-time="))
            .cloned()
            .unwrap()
    };
    assert_eq!(genesis(&bootstrap_args), genesis(&client_args));
    assert!(client_args.contains(&"--bootstrap=10.0.9.0:7513".to_string()));
    assert!(client_args.contains(&"--poet-server=10.0.9.0:80".to_string()));

    let calls = h.timing.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "bootstrap-0");
    assert_eq!(calls[0].1, POET_START_BODY);
}

#[tokio::test(start_paused = true)]
async fn test_successful_run_deletes_without_dump() {
    let config = NetworkConfigBuilder::new().namespace("green").build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let report = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    let payloads = h.queue.payloads();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload.namespace, "green");
    assert!(payload.is_delns);
    assert!(!payload.is_dump);
    assert!(payload.dump.is_none());
    assert_eq!(payload.pool_name, "pool-green");
    assert_eq!(payload.cluster_name, "ci");
    assert_eq!(payload.node_pool_zone, "us-east1-b");
    assert_eq!(report.teardown.as_ref(), Some(payload));

    let (queue, _) = &h.queue.tasks.lock().unwrap()[0];
    assert_eq!(queue.queue_name, "teardown");
    assert_eq!(queue.project_id, "testnets");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_scenario_requests_dump() {
    let config = NetworkConfigBuilder::new().namespace("red").build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let suite = ScenarioSuite::new("network")
        .with(passing("first"))
        .with(Scenario::new("second", |_env| async {
            Err(ScenarioFailure::check("layer 7 missing"))
        }));
    let report = h.lifecycle.run(&suite).await.unwrap();

    assert!(!report.success());
    assert_eq!(report.scenarios[0].outcome, ScenarioOutcome::Passed);
    assert!(matches!(report.scenarios[1].outcome, ScenarioOutcome::Failed(ref m) if m.contains("layer 7")));

    let payload = &h.queue.payloads()[0];
    assert!(payload.is_delns);
    assert!(payload.is_dump);
    let dump = payload.dump.as_ref().unwrap();
    assert_eq!(dump.es_ip, "34.120.0.7");
    assert_eq!(dump.es_user, "elastic");
    assert_eq!(dump.main_es_ip, "10.200.0.1");
    assert_eq!(dump.dump_queue_name, "dump");
    assert_eq!(dump.index_date.len(), "2026.10.16".len());
}

/// The timing service never logs its ready phrase: setup fails in the
/// bootstrap phase, no client is deployed, and the run is still dumped.
#[tokio::test(start_paused = true)]
async fn test_missing_ready_phrase_fails_bootstrap() {
    let config = NetworkConfigBuilder::new().namespace("stuck").timeout(30).build();
    let timeline = Timeline {
        phrase: None,
        ..Timeline::default()
    };
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(timeline));

    let started = Arc::new(Mutex::new(None));
    let suite = ScenarioSuite::new("network").with(timed_scenario(Instant::now(), started.clone()));
    let report = h.lifecycle.run(&suite).await.unwrap();

    let failure = report.setup_failure.as_ref().unwrap();
    assert_eq!(failure.phase, LifecycleState::BootstrapReady);
    assert!(matches!(
        failure.error,
        Error::DependencyNotReady { ref pod, .. } if pod == "bootstrap-0"
    ));
    assert!(!report.success());
    assert!(report.scenarios.is_empty());
    assert!(started.lock().unwrap().is_none());
    assert_eq!(h.timing.call_count(), 0);
    assert!(h.cluster.image_of("client").is_none());

    let payloads = h.queue.payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].is_dump);
    assert!(payloads[0].is_delns);

    assert_eq!(
        h.lifecycle.history(),
        [
            LifecycleState::NotStarted,
            LifecycleState::Provisioning,
            LifecycleState::LoggingReady,
            LifecycleState::PoolScaled,
            LifecycleState::Reporting,
            LifecycleState::Done,
        ]
        .as_slice()
    );
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_init_response_fails_bootstrap() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::with(
        config,
        test_settings(),
        FakeCluster::new(Timeline::default()),
        RecordingQueue::default(),
        FakeTiming::answering(r#"{"error":"already started"}"#),
    );

    let outcome = h.lifecycle.setup(false).await.unwrap();

    let SetupOutcome::Failed(failure) = outcome else {
        panic!("expected setup failure");
    };
    assert_eq!(failure.phase, LifecycleState::BootstrapReady);
    assert!(matches!(
        failure.error,
        Error::Initialization { ref response } if response.contains("already started")
    ));
    assert_eq!(h.lifecycle.state(), LifecycleState::Reporting);
}

#[tokio::test(start_paused = true)]
async fn test_init_response_whitespace_is_accepted() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::with(
        config,
        test_settings(),
        FakeCluster::new(Timeline::default()),
        RecordingQueue::default(),
        FakeTiming::answering("{}\n"),
    );

    let outcome = h.lifecycle.setup(false).await.unwrap();
    assert!(matches!(outcome, SetupOutcome::Ready(_)));
    assert_eq!(h.lifecycle.state(), LifecycleState::GenesisSynced);
}

#[tokio::test(start_paused = true)]
async fn test_clients_never_ready_times_out() {
    let config = NetworkConfigBuilder::new().timeout(20).build();
    let timeline = Timeline {
        clients_ready: Duration::from_secs(3600),
        ..Timeline::default()
    };
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(timeline));

    let SetupOutcome::Failed(failure) = h.lifecycle.setup(false).await.unwrap() else {
        panic!("expected setup failure");
    };
    assert_eq!(failure.phase, LifecycleState::ClientsReady);
    assert!(matches!(failure.error, Error::ReadinessTimeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_namespace_fails_provisioning() {
    let config = NetworkConfigBuilder::new().namespace("taken").build();
    let cluster = FakeCluster::new(Timeline::default()).with_namespace("taken");
    let mut h = Harness::new(config, test_settings(), cluster);

    let report = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    let failure = report.setup_failure.as_ref().unwrap();
    assert_eq!(failure.phase, LifecycleState::Provisioning);
    assert!(matches!(
        failure.error,
        Error::DuplicateResource { kind: "namespace", ref name } if name == "taken"
    ));
    assert!(h.cluster.created().is_empty());
    assert!(h.pools.requests.lock().unwrap().is_empty());

    assert_eq!(h.cluster.namespaces(), vec!["taken".to_string()]);
    assert!(report.namespace.is_none());
    assert!(h.lifecycle.namespace().is_none());

    // Reported under the run's own id, never the pre-existing namespace
    let payloads = h.queue.payloads();
    assert_eq!(payloads.len(), 1);
    let run_id = h.lifecycle.run_id();
    assert!(run_id.starts_with("tester-"));
    assert_eq!(payloads[0].namespace, run_id);
    assert_ne!(payloads[0].namespace, "taken");
    assert_eq!(payloads[0].pool_name, format!("pool-{run_id}"));
    assert_ne!(payloads[0].pool_name, "pool-taken");
}

#[tokio::test(start_paused = true)]
async fn test_queue_failure_does_not_fail_run() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::with(
        config,
        test_settings(),
        FakeCluster::new(Timeline::default()),
        RecordingQueue::failing(),
        FakeTiming::default(),
    );

    let report = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    assert!(report.success());
    assert!(report.teardown.is_none());
    assert_eq!(h.queue.tasks.lock().unwrap().len(), 1);
    assert_eq!(h.lifecycle.state(), LifecycleState::Done);
}

// ============================================================================
// Skip, debug and teardown guards
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_skipped_suite_touches_nothing() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let suite = ScenarioSuite::new("network").with(passing("noop")).skipped();
    let report = h.lifecycle.run(&suite).await.unwrap();

    assert!(report.skipped);
    assert!(report.scenarios.is_empty());
    assert!(report.teardown.is_none());
    assert!(h.cluster.namespaces().is_empty());
    assert!(h.cluster.created().is_empty());
    assert!(h.pools.requests.lock().unwrap().is_empty());
    assert!(h.queue.payloads().is_empty());
    assert_eq!(h.lifecycle.state(), LifecycleState::Skipped);

    assert!(h.lifecycle.teardown(true).await.unwrap().is_none());
    assert!(h.queue.payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_all_scenarios_skipped_skips_setup() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let suite = ScenarioSuite::new("network")
        .with(passing("first").skipped())
        .with(passing("second").skipped());
    assert!(!suite.skip);
    let report = h.lifecycle.run(&suite).await.unwrap();

    assert!(report.skipped);
    assert!(report.scenarios.is_empty());
    assert!(report.teardown.is_none());
    assert!(h.cluster.namespaces().is_empty());
    assert!(h.cluster.created().is_empty());
    assert!(h.pools.requests.lock().unwrap().is_empty());
    assert!(h.queue.payloads().is_empty());
    assert_eq!(h.lifecycle.state(), LifecycleState::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_debug_mode_reraises_and_keeps_namespace() {
    let config = NetworkConfigBuilder::new().namespace("inspect-me").timeout(15).build();
    let mut settings = test_settings();
    settings.debug = true;
    let timeline = Timeline {
        phrase: None,
        ..Timeline::default()
    };
    let mut h = Harness::new(config, settings, FakeCluster::new(timeline));

    let failure = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap_err();

    assert_eq!(failure.phase, LifecycleState::BootstrapReady);
    assert!(matches!(failure.error, Error::DependencyNotReady { .. }));
    assert_eq!(h.lifecycle.state(), LifecycleState::PoolScaled);
    assert_eq!(h.cluster.namespaces(), vec!["inspect-me".to_string()]);

    assert!(h.lifecycle.teardown(false).await.unwrap().is_none());
    assert!(h.queue.payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_reports_exactly_once() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    h.lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();
    assert!(h.lifecycle.teardown(false).await.unwrap().is_none());
    assert!(h.lifecycle.teardown(true).await.unwrap().is_none());

    assert_eq!(h.queue.payloads().len(), 1);
    assert!(!h.queue.payloads()[0].is_dump);
}

/// Teardown straight after setup still passes through Running.
#[tokio::test(start_paused = true)]
async fn test_teardown_after_setup_without_scenarios() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    assert!(matches!(
        h.lifecycle.setup(false).await.unwrap(),
        SetupOutcome::Ready(_)
    ));
    let payload = h.lifecycle.teardown(true).await.unwrap().unwrap();

    assert!(!payload.is_dump);
    assert_eq!(h.lifecycle.history(), FULL_RUN.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_before_setup_is_noop() {
    let config = NetworkConfigBuilder::new().build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    assert!(h.lifecycle.teardown(false).await.unwrap().is_none());
    assert_eq!(h.lifecycle.state(), LifecycleState::NotStarted);
    assert!(h.queue.payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_network_liveness_checks_every_group() {
    let config = NetworkConfigBuilder::new()
        .clients(3)
        .clientv2("node:v2", true, 2)
        .build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    // 3 layers per epoch at 10s each
    let suite = ScenarioSuite::new("network").with(network_liveness(h.cluster.clone(), 2));
    let report = h.lifecycle.run(&suite).await.unwrap();

    assert!(report.success());
    assert_eq!(report.scenarios.len(), 1);
    assert_eq!(report.scenarios[0].name, "network_liveness");
    assert_eq!(report.scenarios[0].outcome, ScenarioOutcome::Passed);
    assert!(report.scenarios[0].elapsed >= Duration::from_secs(60));
}

// ============================================================================
// Image override
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_image_override_respects_noreplace() {
    let config = NetworkConfigBuilder::new()
        .image("node:develop")
        .clientv2("node:v2", true, 2)
        .build();
    let mut settings = test_settings();
    settings.image_override = "node:pr-42".to_string();
    let mut h = Harness::new(config, settings, FakeCluster::new(Timeline::default()));

    let report = h
        .lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(h.cluster.image_of("bootstrap").as_deref(), Some("node:pr-42"));
    assert_eq!(h.cluster.image_of("client").as_deref(), Some("node:pr-42"));
    assert_eq!(h.cluster.image_of("clientv2").as_deref(), Some("node:v2"));
    assert_eq!(h.lifecycle.config().client.image, "node:pr-42");
}

#[tokio::test(start_paused = true)]
async fn test_image_override_replaces_clientv2() {
    let config = NetworkConfigBuilder::new()
        .clientv2("node:v2", false, 1)
        .build();
    let mut settings = test_settings();
    settings.image_override = "node:pr-42".to_string();
    let mut h = Harness::new(config, settings, FakeCluster::new(Timeline::default()));

    h.lifecycle
        .run(&ScenarioSuite::new("network").with(passing("noop")))
        .await
        .unwrap();

    assert_eq!(h.cluster.image_of("clientv2").as_deref(), Some("node:pr-42"));
    let clientv2_args = h.cluster.args_of("clientv2");
    assert!(clientv2_args.contains(&"--bootstrap=10.0.9.0:7513".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_environment_handed_to_scenarios() {
    let config = NetworkConfigBuilder::new()
        .namespace("env-check")
        .clients(2)
        .clientv2("node:v2", true, 1)
        .build();
    let mut h = Harness::new(config, test_settings(), FakeCluster::new(Timeline::default()));

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let suite = ScenarioSuite::new("network").with(Scenario::new("inspect", move |env| {
        let sink = sink.clone();
        async move {
            *sink.lock().unwrap() = Some(env);
            Ok(())
        }
    }));
    h.lifecycle.run(&suite).await.unwrap();

    let env = seen.lock().unwrap().clone().unwrap();
    assert_eq!(env.namespace, "env-check");
    assert_eq!(env.pool.name, "pool-env-check");
    assert_eq!(env.network.bootstrap.pods.len(), 1);
    assert_eq!(env.network.clients.pods.len(), 2);
    assert_eq!(env.network.clients_v2.as_ref().unwrap().pods.len(), 1);
    assert_eq!(env.network.all_pods().count(), 4);
    assert!(env.network.all_pods().all(|p| p.ready && !p.ip.is_empty()));
}
