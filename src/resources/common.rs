//! Labels and metadata shared by every object the harness creates.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::cluster::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Label selecting the pods of one workload
pub const APP_LABEL: &str = "app";
/// Node label GKE puts on every node of a pool
pub const NODE_POOL_LABEL: &str = "cloud.google.com/gke-nodepool";

/// Labels on an object and its pods.
pub fn standard_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), app.to_string()),
        ("app.kubernetes.io/name".to_string(), app.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Subset of [`standard_labels`] used in selectors.
pub fn selector_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.to_string())])
}

pub fn label_selector(app: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(app)),
        ..Default::default()
    }
}

/// Selector string for listing the pods of `app`.
pub fn pod_selector(app: &str) -> String {
    format!("{APP_LABEL}={app}")
}

pub fn object_meta(name: &str, namespace: &str, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(standard_labels(app)),
        ..Default::default()
    }
}

/// Pod template metadata for `app`.
pub fn template_meta(app: &str) -> ObjectMeta {
    ObjectMeta {
        labels: Some(standard_labels(app)),
        ..Default::default()
    }
}

/// Resource map as quantities, `None` when empty.
pub fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}
