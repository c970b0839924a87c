use crate::error::Result;
use crate::k8s::api::ClusterApi;
use crate::k8s::resources::{ApiTarget, ResourceKind};
use std::sync::Arc;
use tracing::debug;

/// Discovery check for whether a resource is served
#[derive(Clone)]
pub struct CapabilityProbe {
    api: Arc<dyn ClusterApi>,
}

impl CapabilityProbe {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// `Ok(false)` when the group/version is absent or does not list
    /// `plural`. Communication failures are errors, never "unsupported".
    ///
    /// # Errors
    ///
    /// Returns an error if discovery could not be queried
    pub async fn supports(&self, group_version: &str, plural: &str) -> Result<bool> {
        let supported = self
            .api
            .served_resources(group_version)
            .await?
            .is_some_and(|names| names.iter().any(|name| name == plural));
        debug!("🔎 {}/{} supported: {}", group_version, plural, supported);
        Ok(supported)
    }

    /// # Errors
    ///
    /// Returns an error if discovery could not be queried
    pub async fn supports_target(&self, target: &ApiTarget) -> Result<bool> {
        self.supports(&target.group_version(), target.plural).await
    }

    /// First candidate of `kind` the server serves, in preference order.
    ///
    /// A legacy candidate is only tried once the preferred one is reported
    /// unsupported; a failed probe aborts resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery could not be queried
    pub async fn resolve(&self, kind: ResourceKind) -> Result<Option<ApiTarget>> {
        for target in kind.candidates() {
            if self.supports_target(target).await? {
                return Ok(Some(*target));
            }
        }
        Ok(None)
    }
}
