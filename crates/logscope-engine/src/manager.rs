//! Sidecar convergence on a pod fragment
//!
//! [`SidecarManager::apply`] is a no-op when the existing sidecar already
//! matches the scope, so repeated passes over an unchanged scope make no
//! writes. [`SidecarManager::remove`] reports removal as verified only once
//! the ConfigMap is confirmed gone, which takes one more pass after the
//! pass that deleted it.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, EnvVar};
use tracing::{debug, info, warn};

use logscope_common::crd::{LoggingScopeConfig, WorkloadRef};

use crate::builder::{
    SidecarSpecBuilder, ELASTICSEARCH_PASSWORD_ENV, ELASTICSEARCH_URL_ENV, ELASTICSEARCH_USER_ENV,
};
use crate::fragment::{PodFragment, SidecarProfile};
use crate::secret::SecretReplicator;
use crate::store::{name_selector, ClusterStore};
use crate::{Result, SIDECAR_CONTAINER_NAME};

/// Applies and removes the log collector sidecar
#[derive(Clone)]
pub struct SidecarManager {
    store: Arc<dyn ClusterStore>,
    secrets: SecretReplicator,
}

impl SidecarManager {
    /// Create a manager with its collaborators
    pub fn new(store: Arc<dyn ClusterStore>, secrets: SecretReplicator) -> Self {
        Self { store, secrets }
    }

    /// Create a manager whose secret replicator shares the same store
    pub fn from_store(store: Arc<dyn ClusterStore>) -> Self {
        let secrets = SecretReplicator::new(store.clone());
        Self::new(store, secrets)
    }

    /// Converge `fragment` towards the sidecar `scope` describes
    ///
    /// Returns whether the fragment changed. The ConfigMap and secret are
    /// only ensured when the sidecar is out of date.
    pub async fn apply(
        &self,
        scope: &LoggingScopeConfig,
        workload: &WorkloadRef,
        fragment: &mut PodFragment,
    ) -> Result<bool> {
        if is_up_to_date(&fragment.containers, scope) {
            debug!(workload = %workload, "sidecar up to date");
            return Ok(false);
        }

        let builder = SidecarSpecBuilder::new(scope, &fragment.profile);
        self.ensure_config_map(&builder, &workload.namespace).await?;
        self.secrets.ensure(&workload.namespace, scope).await?;

        for volume in builder.build_volumes() {
            if !fragment.volumes.iter().any(|v| v.name == volume.name) {
                fragment.volumes.push(volume);
            }
        }
        for mount in builder.build_shared_mounts() {
            if !fragment.volume_mounts.iter().any(|m| m.name == mount.name) {
                fragment.volume_mounts.push(mount);
            }
        }

        let sidecar = builder.build_container(workload, &fragment.log_path, &fragment.handler_env);
        match fragment.container_index(SIDECAR_CONTAINER_NAME) {
            Some(index) => fragment.containers[index] = sidecar,
            None => fragment.containers.push(sidecar),
        }

        info!(workload = %workload, image = %scope.fluentd_image, "sidecar applied");
        Ok(true)
    }

    /// Take the sidecar out of `fragment` and delete its ConfigMap
    ///
    /// Returns whether removal is verified, i.e. the ConfigMap was already
    /// absent when checked. Volumes and mounts are left in place for
    /// profiles whose mount strategy retains them. A failed delete is an
    /// error so the caller keeps the association.
    pub async fn remove(
        &self,
        scope: &LoggingScopeConfig,
        workload: &WorkloadRef,
        fragment: &mut PodFragment,
    ) -> Result<bool> {
        // Container order carries no meaning
        if let Some(index) = fragment.container_index(SIDECAR_CONTAINER_NAME) {
            fragment.containers.swap_remove(index);
        }

        if !fragment.profile.mount.retains_volumes_on_remove() {
            let builder = SidecarSpecBuilder::new(scope, &fragment.profile);
            let owned = builder.volume_names();
            fragment.volumes.retain(|v| !owned.contains(&v.name));
        }

        let verified = self
            .remove_config_map(&fragment.profile, &workload.namespace)
            .await?;
        debug!(workload = %workload, verified, "sidecar removed");
        Ok(verified)
    }

    /// Create the ConfigMap unless it exists; losing a create race is success
    async fn ensure_config_map(
        &self,
        builder: &SidecarSpecBuilder<'_>,
        namespace: &str,
    ) -> Result<()> {
        let config_map = builder.build_config_map(namespace);
        match self.store.create_config_map(&config_map).await {
            Ok(()) => {
                info!(namespace = %namespace, "created fluentd ConfigMap");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_config_map(&self, profile: &SidecarProfile, namespace: &str) -> Result<bool> {
        let existing = self
            .store
            .list_config_maps(namespace, &name_selector(&profile.config_map))
            .await?;
        if existing.is_empty() {
            return Ok(true);
        }

        if let Err(e) = self
            .store
            .delete_config_map(namespace, &profile.config_map)
            .await
        {
            warn!(
                namespace = %namespace,
                config_map = %profile.config_map,
                error = %e,
                "failed to delete fluentd ConfigMap"
            );
            return Err(e);
        }
        Ok(false)
    }
}

/// Whether the fragment's sidecar matches `scope`
///
/// Compares the image, the Elasticsearch URL and the secret behind both
/// credential references. A fragment without a sidecar is out of date.
pub fn is_up_to_date(containers: &[Container], scope: &LoggingScopeConfig) -> bool {
    let Some(sidecar) = containers.iter().find(|c| c.name == SIDECAR_CONTAINER_NAME) else {
        return false;
    };
    if sidecar.image.as_deref() != Some(scope.fluentd_image.as_str()) {
        return false;
    }

    let env = sidecar.env.as_deref().unwrap_or_default();
    env_value(env, ELASTICSEARCH_URL_ENV) == Some(scope.elastic_search_url.as_str())
        && env_secret_name(env, ELASTICSEARCH_USER_ENV) == Some(scope.secret_name.as_str())
        && env_secret_name(env, ELASTICSEARCH_PASSWORD_ENV) == Some(scope.secret_name.as_str())
}

fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
    env.iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}

fn env_secret_name<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
    env.iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value_from.as_ref())
        .and_then(|source| source.secret_key_ref.as_ref())
        .map(|selector| selector.name.as_str())
}
