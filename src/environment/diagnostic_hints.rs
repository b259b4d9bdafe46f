//! Diagnostic hints for failed setup phases.
//!
//! When setup fails the coordinator logs a short list of likely causes and
//! kubectl/gcloud commands to look at, specific to the phase that failed.

use std::fmt;

use crate::environment::state_machine::LifecycleState;
use crate::environment::node_pool::pool_name;
use crate::resources::logging::{ELASTICSEARCH, FLUENT_BIT, KIBANA};
use crate::resources::node::{BOOTSTRAP_GROUP, POET_CONTAINER};

/// A command worth running when investigating a failure.
#[derive(Debug, Clone)]
pub struct DiagnosticCommand {
    pub description: &'static str,
    pub command: String,
}

impl DiagnosticCommand {
    fn new(description: &'static str, command: impl Into<String>) -> Self {
        Self {
            description,
            command: command.into(),
        }
    }
}

/// Likely causes and commands for one failed phase.
#[derive(Debug, Clone)]
pub struct DiagnosticHint {
    pub summary: &'static str,
    pub common_causes: Vec<&'static str>,
    pub commands: Vec<DiagnosticCommand>,
}

impl DiagnosticHint {
    /// Hint for a failure in `phase` of the run in `namespace`.
    pub fn for_phase(phase: LifecycleState, namespace: &str) -> Self {
        match phase {
            LifecycleState::Provisioning => Self::provisioning(namespace),
            LifecycleState::LoggingReady => Self::logging(namespace),
            LifecycleState::PoolScaled => Self::pool(namespace),
            LifecycleState::BootstrapReady => Self::bootstrap(namespace),
            LifecycleState::ClientsReady => Self::clients(namespace),
            LifecycleState::NotStarted
            | LifecycleState::GenesisSynced
            | LifecycleState::Running
            | LifecycleState::Reporting
            | LifecycleState::Done
            | LifecycleState::Skipped => Self::generic(namespace),
        }
    }

    fn events(namespace: &str) -> DiagnosticCommand {
        DiagnosticCommand::new(
            "Recent events in namespace",
            format!("kubectl get events -n {namespace} --sort-by='.lastTimestamp' | tail -20"),
        )
    }

    fn provisioning(namespace: &str) -> Self {
        Self {
            summary: "Namespace could not be created",
            common_causes: vec![
                "Namespace left over from an earlier run with the same name",
                "Credentials lack permission to create namespaces",
            ],
            commands: vec![
                DiagnosticCommand::new(
                    "Check whether the namespace exists",
                    format!("kubectl get namespace {namespace} -o wide"),
                ),
                DiagnosticCommand::new(
                    "Check permissions",
                    "kubectl auth can-i create namespaces",
                ),
            ],
        }
    }

    fn logging(namespace: &str) -> Self {
        Self {
            summary: "Logging stack did not become ready",
            common_causes: vec![
                "Elasticsearch pod pending for lack of memory",
                "Fluent Bit pods crashing on a bad configuration",
                "Kibana cannot reach Elasticsearch",
            ],
            commands: vec![
                DiagnosticCommand::new(
                    "Check logging workloads",
                    format!(
                        "kubectl get statefulset/{ELASTICSEARCH} daemonset/{FLUENT_BIT} deployment/{KIBANA} -n {namespace}"
                    ),
                ),
                DiagnosticCommand::new(
                    "Check Elasticsearch logs",
                    format!("kubectl logs -n {namespace} {ELASTICSEARCH}-0 --tail=100"),
                ),
                Self::events(namespace),
            ],
        }
    }

    fn pool(namespace: &str) -> Self {
        let pool = pool_name(namespace);
        Self {
            summary: "Node pool did not come up or log collector did not cover it",
            common_causes: vec![
                "Compute quota exceeded in the cluster zone",
                "Machine type unavailable in the zone",
                "Fluent Bit pods not scheduled on the new nodes",
            ],
            commands: vec![
                DiagnosticCommand::new(
                    "Check node pool status",
                    format!("gcloud container node-pools describe {pool}"),
                ),
                DiagnosticCommand::new(
                    "Check pool nodes",
                    format!("kubectl get nodes -l cloud.google.com/gke-nodepool={pool}"),
                ),
                DiagnosticCommand::new(
                    "Check collector daemon",
                    format!("kubectl describe daemonset {FLUENT_BIT} -n {namespace}"),
                ),
            ],
        }
    }

    fn bootstrap(namespace: &str) -> Self {
        Self {
            summary: "Bootstrap node or timing service not ready",
            common_causes: vec![
                "Image pull failed (ImagePullBackOff)",
                "Node container crashing on startup",
                "Timing service never started its REST proxy",
                "Timing service rejected the start call",
            ],
            commands: vec![
                DiagnosticCommand::new(
                    "Check bootstrap pods",
                    format!("kubectl get pods -n {namespace} -l app={BOOTSTRAP_GROUP} -o wide"),
                ),
                DiagnosticCommand::new(
                    "Check timing service log",
                    format!(
                        "kubectl logs -n {namespace} -l app={BOOTSTRAP_GROUP} -c {POET_CONTAINER} --tail=100"
                    ),
                ),
                Self::events(namespace),
            ],
        }
    }

    fn clients(namespace: &str) -> Self {
        Self {
            summary: "Client nodes not ready",
            common_causes: vec![
                "Pods pending because the node pool is too small",
                "Image pull failed (ImagePullBackOff)",
                "Clients crashing while connecting to the bootstrap node",
            ],
            commands: vec![
                DiagnosticCommand::new(
                    "Check client pods",
                    format!("kubectl get pods -n {namespace} -l 'app in (client,clientv2)' -o wide"),
                ),
                DiagnosticCommand::new(
                    "Describe pending pods",
                    format!("kubectl describe pods -n {namespace} --field-selector=status.phase=Pending"),
                ),
                Self::events(namespace),
            ],
        }
    }

    fn generic(namespace: &str) -> Self {
        Self {
            summary: "Setup failed outside a deployment phase",
            common_causes: vec!["Cluster API unavailable"],
            commands: vec![
                DiagnosticCommand::new(
                    "Check all pods",
                    format!("kubectl get pods -n {namespace} -o wide"),
                ),
                Self::events(namespace),
            ],
        }
    }
}

impl fmt::Display for DiagnosticHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Issue: {}", self.summary)?;
        writeln!(f, "Common causes:")?;
        for cause in &self.common_causes {
            writeln!(f, "  - {cause}")?;
        }
        writeln!(f, "Diagnostic commands:")?;
        for (i, cmd) in self.commands.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, cmd.description)?;
            writeln!(f, "     $ {}", cmd.command)?;
        }
        Ok(())
    }
}
