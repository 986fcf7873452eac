//! Cluster Store: the Kubernetes operations the engine depends on
//!
//! Everything the engine reads or writes goes through [`ClusterStore`], so
//! passes can be exercised against mocks or an in-memory store in tests.
//! Implementations map HTTP 404 on reads to `None` and HTTP 409 on creates to
//! [`Error::AlreadyExists`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use logscope_common::crd::{LoggingScope, LoggingScopeStatus};
use logscope_common::FIELD_MANAGER;

use crate::{Error, Result};

/// Trait abstracting the Kubernetes operations used by the engine
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Get a LoggingScope by namespace and name
    async fn get_scope(&self, namespace: &str, name: &str) -> Result<Option<LoggingScope>>;

    /// Replace the status of a LoggingScope
    async fn patch_scope_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LoggingScopeStatus,
    ) -> Result<()>;

    /// Get a Secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// List ConfigMaps in a namespace matching a field selector
    async fn list_config_maps(&self, namespace: &str, field_selector: &str)
        -> Result<Vec<ConfigMap>>;

    /// Create a ConfigMap
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Delete a ConfigMap; deleting a missing ConfigMap succeeds
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a Deployment by namespace and name
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Replace a Deployment
    async fn update_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Get an arbitrary namespaced object by resource type, namespace and name
    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Replace an arbitrary namespaced object
    async fn update_dynamic(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()>;
}

/// Field selector matching a single object by name
pub fn name_selector(name: &str) -> String {
    format!("metadata.name={name}")
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    /// Create a new KubeClusterStore wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Turn a 404 into `None`
fn found<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Turn a 409 into [`Error::AlreadyExists`]
fn created<T>(
    result: std::result::Result<T, kube::Error>,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            Err(Error::already_exists(kind, namespace, name))
        }
        Err(e) => Err(e.into()),
    }
}

/// Namespace of an object about to be written
fn namespace_of<K: ResourceExt>(obj: &K) -> Result<String> {
    obj.namespace().ok_or_else(|| {
        Error::internal_with_context(
            "store",
            format!("{} has no namespace", obj.name_any()),
        )
    })
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_scope(&self, namespace: &str, name: &str) -> Result<Option<LoggingScope>> {
        let api: Api<LoggingScope> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn patch_scope_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LoggingScopeStatus,
    ) -> Result<()> {
        let api: Api<LoggingScope> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        debug!(
            namespace = %namespace,
            scope = %name,
            resources = status.resources.len(),
            "patched scope status"
        );
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let namespace = namespace_of(secret)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let result = api.create(&PostParams::default(), secret).await;
        created(result, "Secret", &namespace, &secret.name_any())
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<Vec<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().fields(field_selector))
            .await?;
        Ok(list.items)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let namespace = namespace_of(config_map)?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        let result = api.create(&PostParams::default(), config_map).await;
        created(result, "ConfigMap", &namespace, &config_map.name_any())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        found(api.get(name).await)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let namespace = namespace_of(deployment)?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        found(api.get(name).await)
    }

    async fn update_dynamic(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()> {
        let namespace = namespace_of(object)?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &namespace, resource);
        api.replace(&object.name_any(), &PostParams::default(), object)
            .await?;
        Ok(())
    }
}
