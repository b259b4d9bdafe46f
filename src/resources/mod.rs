//! Kubernetes object generation for the logging stack and network nodes.

pub mod common;
pub mod logging;
pub mod node;
