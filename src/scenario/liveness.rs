use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cluster::ClusterOps;
use crate::config::{LAYER_DURATION_ARG, LAYERS_PER_EPOCH_ARG, NodeSpec};
use crate::resources::common::pod_selector;
use crate::scenario::{Scenario, ScenarioFailure, sleep_with_countdown};

/// Length of one epoch for nodes running `spec`.
pub fn epoch_duration(spec: &NodeSpec) -> crate::environment::Result<Duration> {
    let layers = spec.arg_u64(LAYERS_PER_EPOCH_ARG)?;
    let layer_secs = spec.arg_u64(LAYER_DURATION_ARG)?;
    Ok(Duration::from_secs(layers.saturating_mul(layer_secs)))
}

/// Let the network run for `epochs` epochs, then check every node group is
/// still fully ready at its original size.
pub fn network_liveness<C>(cluster: Arc<C>, epochs: u64) -> Scenario
where
    C: ClusterOps + 'static,
{
    Scenario::new("network_liveness", move |env| {
        let cluster = cluster.clone();
        async move {
            let epoch = epoch_duration(&env.config.client)?;
            let wait = epoch.saturating_mul(u32::try_from(epochs).unwrap_or(u32::MAX));
            info!(epochs = epochs, wait_secs = wait.as_secs(), "Letting the network run");
            sleep_with_countdown(wait, Duration::from_secs(60)).await;

            for group in env.network.groups() {
                let pods = cluster
                    .list_pods(&env.namespace, &pod_selector(&group.name))
                    .await?;
                let ready = pods.iter().filter(|p| p.ready).count();
                if ready < group.pods.len() {
                    return Err(ScenarioFailure::check(format!(
                        "{}: {ready} of {} pods ready after {epochs} epochs",
                        group.name,
                        group.pods.len()
                    )));
                }
            }
            Ok(())
        }
    })
}
