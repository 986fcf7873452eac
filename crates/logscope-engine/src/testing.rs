//! In-memory Cluster Store for multi-pass tests
//!
//! Behaves like the API server for the handful of operations the engine
//! uses: 404 reads come back as `None`, duplicate creates as
//! `AlreadyExists`. Writes can be made to fail per object name.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::{ApiResource, DynamicObject};
use kube::ResourceExt;

use logscope_common::crd::{LoggingScope, LoggingScopeStatus};

use crate::store::ClusterStore;
use crate::{Error, Result};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn object_key<K: ResourceExt>(obj: &K) -> Key {
    key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

#[derive(Default)]
struct State {
    scopes: BTreeMap<Key, LoggingScope>,
    secrets: BTreeMap<Key, Secret>,
    config_maps: BTreeMap<Key, ConfigMap>,
    deployments: BTreeMap<Key, Deployment>,
    dynamic: BTreeMap<(String, Key), DynamicObject>,
    status_writes: usize,
    workload_writes: usize,
    failing_writes: BTreeSet<String>,
}

/// Mutex-guarded maps standing in for the API server
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert_scope(&self, scope: LoggingScope) {
        self.with(|s| s.scopes.insert(object_key(&scope), scope));
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.with(|s| s.secrets.insert(object_key(&secret), secret));
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        self.with(|s| s.config_maps.insert(object_key(&config_map), config_map));
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.with(|s| s.deployments.insert(object_key(&deployment), deployment));
    }

    pub fn insert_dynamic(&self, resource: &ApiResource, object: DynamicObject) {
        self.with(|s| {
            s.dynamic
                .insert((resource.kind.clone(), object_key(&object)), object)
        });
    }

    /// Make every update of the named object fail
    pub fn fail_writes_to(&self, name: &str) {
        self.with(|s| s.failing_writes.insert(name.to_string()));
    }

    pub fn scope(&self, namespace: &str, name: &str) -> Option<LoggingScope> {
        self.with(|s| s.scopes.get(&key(namespace, name)).cloned())
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.with(|s| s.secrets.get(&key(namespace, name)).cloned())
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.with(|s| s.config_maps.get(&key(namespace, name)).cloned())
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.with(|s| s.deployments.get(&key(namespace, name)).cloned())
    }

    pub fn dynamic(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.with(|s| {
            s.dynamic
                .get(&(kind.to_string(), key(namespace, name)))
                .cloned()
        })
    }

    pub fn status_writes(&self) -> usize {
        self.with(|s| s.status_writes)
    }

    pub fn workload_writes(&self) -> usize {
        self.with(|s| s.workload_writes)
    }

    fn check_write(state: &State, name: &str) -> Result<()> {
        if state.failing_writes.contains(name) {
            return Err(Error::internal_with_context(
                "memory-store",
                format!("write to {name} rejected"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_scope(&self, namespace: &str, name: &str) -> Result<Option<LoggingScope>> {
        Ok(self.scope(namespace, name))
    }

    async fn patch_scope_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LoggingScopeStatus,
    ) -> Result<()> {
        self.with(|s| {
            Self::check_write(s, name)?;
            s.status_writes += 1;
            if let Some(scope) = s.scopes.get_mut(&key(namespace, name)) {
                scope.status = Some(status.clone());
            }
            Ok(())
        })
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.with(|s| {
            let k = object_key(secret);
            if s.secrets.contains_key(&k) {
                return Err(Error::already_exists("Secret", k.0, k.1));
            }
            s.secrets.insert(k, secret.clone());
            Ok(())
        })
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<Vec<ConfigMap>> {
        let name = field_selector.strip_prefix("metadata.name=").unwrap_or_default();
        Ok(self.config_map(namespace, name).into_iter().collect())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.with(|s| {
            let k = object_key(config_map);
            if s.config_maps.contains_key(&k) {
                return Err(Error::already_exists("ConfigMap", k.0, k.1));
            }
            s.config_maps.insert(k, config_map.clone());
            Ok(())
        })
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.with(|s| {
            Self::check_write(s, name)?;
            s.config_maps.remove(&key(namespace, name));
            Ok(())
        })
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployment(namespace, name))
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.with(|s| {
            Self::check_write(s, &deployment.name_any())?;
            s.workload_writes += 1;
            s.deployments.insert(object_key(deployment), deployment.clone());
            Ok(())
        })
    }

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.dynamic(&resource.kind, namespace, name))
    }

    async fn update_dynamic(&self, resource: &ApiResource, object: &DynamicObject) -> Result<()> {
        self.with(|s| {
            Self::check_write(s, &object.name_any())?;
            s.workload_writes += 1;
            s.dynamic
                .insert((resource.kind.clone(), object_key(object)), object.clone());
            Ok(())
        })
    }
}
