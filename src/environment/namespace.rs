//! Namespace allocation.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, instrument};

use crate::cluster::ClusterOps;
use crate::environment::error::{Error, Result};

/// Length of the random part of a generated namespace.
pub const NAMESPACE_SUFFIX_LEN: usize = 8;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `<operator>-<8 random [a-z0-9]>`.
pub fn random_namespace(operator: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAMESPACE_SUFFIX_LEN)
        .filter_map(|_| SUFFIX_CHARSET.get(rng.gen_range(0..SUFFIX_CHARSET.len())))
        .map(|&b| char::from(b))
        .collect();
    format!("{operator}-{suffix}")
}

/// Allocates the run's namespace
pub struct NamespaceProvisioner<C> {
    cluster: Arc<C>,
    operator: String,
}

impl<C: ClusterOps> NamespaceProvisioner<C> {
    pub fn new(cluster: Arc<C>, operator: impl Into<String>) -> Self {
        Self {
            cluster,
            operator: operator.into(),
        }
    }

    /// The namespace `provision` would use for `requested`.
    pub fn resolve_name(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => random_namespace(&self.operator),
        }
    }

    /// Create `requested`, or a generated namespace when it is empty or absent.
    ///
    /// Fails with `DuplicateResource` when the name is already taken; nothing
    /// is rolled back on later failures.
    #[instrument(skip(self))]
    pub async fn provision(&self, requested: Option<&str>) -> Result<String> {
        let name = self.resolve_name(requested);
        self.create_unique(&name).await?;
        Ok(name)
    }

    /// Create `name` unless it already exists.
    pub async fn create_unique(&self, name: &str) -> Result<()> {
        let existing = self.cluster.list_namespaces().await?;
        if existing.iter().any(|ns| ns == name) {
            return Err(Error::DuplicateResource {
                kind: "namespace",
                name: name.to_string(),
            });
        }

        self.cluster.create_namespace(name).await?;
        info!(namespace = %name, "Namespace created");
        Ok(())
    }
}
