//! Typed-domain adapter
//!
//! Domain resources carry their pod template under `spec.serverPod`. Servers
//! write log files into a shared volume, so the sidecar reads them from the
//! volume holding `spec.logHome` and the domain is switched to log there.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, Volume, VolumeMount};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use logscope_common::crd::WorkloadRef;

use super::{Extracted, PodTemplateAccess};
use crate::builder::{label_env, literal_env};
use crate::fragment::{MountStrategy, PodFragment, SidecarProfile};
use crate::parse_rules::DOMAIN_PARSE_RULES;
use crate::store::ClusterStore;
use crate::{Error, Result};

/// ConfigMap shared by every domain in a namespace
pub const DOMAIN_CONFIG_MAP_NAME: &str = "fluentd-config-weblogic";

/// Volume used when the domain does not set `logHome`
pub const DEFAULT_STORAGE_VOLUME_NAME: &str = "weblogic-domain-storage-volume";

/// Mount path of the default storage volume
pub const DEFAULT_STORAGE_MOUNT_PATH: &str = "/scratch";

/// Pod label carrying the server name
const SERVER_NAME_LABEL: &str = "weblogic.serverName";

/// Reads and writes `spec.serverPod` of a domain resource
pub struct DomainWorkloadAccess {
    store: Arc<dyn ClusterStore>,
}

impl DomainWorkloadAccess {
    /// Create access backed by the given store
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

/// Log directory assigned to a domain that does not set one
pub fn default_log_home(domain: &str) -> String {
    format!("{DEFAULT_STORAGE_MOUNT_PATH}/logs/{domain}")
}

fn api_resource(workload: &WorkloadRef) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        workload.group(),
        workload.version(),
        &workload.kind,
    ))
}

fn domain_profile(mount: MountStrategy) -> SidecarProfile {
    SidecarProfile {
        mount,
        config_map: DOMAIN_CONFIG_MAP_NAME.to_string(),
        parse_rules: DOMAIN_PARSE_RULES.to_string(),
    }
}

/// Files the servers write under the log home
fn log_path(log_home: &str) -> String {
    [
        "$(SERVER_NAME).log",
        "$(SERVER_NAME)_access.log",
        "$(SERVER_NAME)_nodemanager.log",
        "$(DOMAIN_UID).log",
    ]
    .iter()
    .map(|file| format!("{log_home}/{file}"))
    .collect::<Vec<_>>()
    .join(",")
}

/// The mount holding the log home, or the default storage volume
fn mount_strategy(log_home: Option<&str>, mounts: &[VolumeMount], domain: &str) -> MountStrategy {
    if let Some(home) = log_home {
        if let Some(mount) = mounts.iter().find(|m| home.starts_with(&m.mount_path)) {
            return MountStrategy::ScratchVolume {
                volume: mount.name.clone(),
                mount_path: mount.mount_path.clone(),
            };
        }
        warn!(
            domain = %domain,
            log_home = %home,
            "logHome is not on any mounted volume, logs will not be collected"
        );
    }
    MountStrategy::ScratchVolume {
        volume: DEFAULT_STORAGE_VOLUME_NAME.to_string(),
        mount_path: DEFAULT_STORAGE_MOUNT_PATH.to_string(),
    }
}

/// `spec` of a domain as a JSON object, created if absent
fn spec_mut<'a>(data: &'a mut Value, workload: &str) -> Result<&'a mut Map<String, Value>> {
    let root = data
        .as_object_mut()
        .ok_or_else(|| Error::invalid_workload(workload, "object data is not a map"))?;
    root.entry("spec")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| Error::invalid_workload(workload, "spec is not an object"))
}

/// `spec.serverPod` as a JSON object, created if absent
fn server_pod_mut<'a>(data: &'a mut Value, workload: &str) -> Result<&'a mut Map<String, Value>> {
    spec_mut(data, workload)?
        .entry("serverPod")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| Error::invalid_workload(workload, "spec.serverPod is not an object"))
}

fn list_field<T: DeserializeOwned>(pod: &Map<String, Value>, field: &str) -> Result<Vec<T>> {
    match pod.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Error::serialization_for(field, e.to_string())),
    }
}

#[async_trait::async_trait]
impl PodTemplateAccess for DomainWorkloadAccess {
    type Object = (ApiResource, DynamicObject);

    async fn extract(
        &self,
        workload: &WorkloadRef,
    ) -> Result<Option<Extracted<(ApiResource, DynamicObject)>>> {
        let resource = api_resource(workload);
        let Some(mut domain) = self
            .store
            .get_dynamic(&resource, &workload.namespace, &workload.name)
            .await?
        else {
            return Ok(None);
        };

        let id = workload.to_string();
        let log_home = spec_mut(&mut domain.data, &id)?
            .get("logHome")
            .and_then(Value::as_str)
            .filter(|home| !home.is_empty())
            .map(str::to_string);
        let pod = server_pod_mut(&mut domain.data, &id)?;
        let containers: Vec<Container> = list_field(pod, "containers")?;
        let volumes: Vec<Volume> = list_field(pod, "volumes")?;
        let volume_mounts: Vec<VolumeMount> = list_field(pod, "volumeMounts")?;

        let mount = mount_strategy(log_home.as_deref(), &volume_mounts, &workload.name);
        let home = log_home.unwrap_or_else(|| default_log_home(&workload.name));

        let mut fragment = PodFragment::empty(domain_profile(mount));
        fragment.containers = containers;
        fragment.volumes = volumes;
        fragment.volume_mounts = volume_mounts;
        fragment.log_path = log_path(&home);
        fragment.handler_env = vec![
            literal_env("DOMAIN_UID", &workload.name),
            label_env("SERVER_NAME", SERVER_NAME_LABEL),
        ];

        Ok(Some(Extracted {
            object: (resource, domain),
            fragment,
        }))
    }

    async fn merge(
        &self,
        (resource, mut domain): (ApiResource, DynamicObject),
        fragment: PodFragment,
    ) -> Result<()> {
        let name = domain.name_any();

        let pod = server_pod_mut(&mut domain.data, &name)?;
        pod.insert("containers".into(), serde_json::to_value(&fragment.containers)?);
        pod.insert("volumes".into(), serde_json::to_value(&fragment.volumes)?);
        pod.insert(
            "volumeMounts".into(),
            serde_json::to_value(&fragment.volume_mounts)?,
        );

        // Servers must log into the volume the sidecar reads
        let spec = spec_mut(&mut domain.data, &name)?;
        let home_unset = spec
            .get("logHome")
            .and_then(Value::as_str)
            .map_or(true, str::is_empty);
        if home_unset {
            spec.insert("logHome".into(), Value::String(default_log_home(&name)));
        }
        if !spec.get("logHomeEnabled").is_some_and(Value::is_boolean) {
            spec.insert("logHomeEnabled".into(), Value::Bool(true));
        }

        self.store.update_dynamic(&resource, &domain).await
    }

    fn orphan_fragment(&self, _workload: &WorkloadRef) -> PodFragment {
        PodFragment::empty(domain_profile(MountStrategy::ScratchVolume {
            volume: DEFAULT_STORAGE_VOLUME_NAME.to_string(),
            mount_path: DEFAULT_STORAGE_MOUNT_PATH.to_string(),
        }))
    }
}
