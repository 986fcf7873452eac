//! Desired-state builder for the log collector sidecar
//!
//! Pure functions of the scope configuration, the workload identity and the
//! adapter's [`SidecarProfile`]. Nothing here talks to the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    HostPathVolumeSource, ObjectFieldSelector, SecretKeySelector, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use logscope_common::crd::{LoggingScopeConfig, WorkloadRef};
use logscope_common::{
    CLUSTER_NAME_KEY, ELASTICSEARCH_PASSWORD_KEY, ELASTICSEARCH_USERNAME_KEY,
};

use crate::fragment::{
    MountStrategy, SidecarProfile, CONFIG_MOUNT_PATH, CONFIG_VOLUME_NAME,
    CONTAINER_LOGS_PATH, CONTAINER_LOGS_VOLUME_NAME, SECRET_MOUNT_PATH, SECRET_VOLUME_NAME,
    VARLOG_PATH, VARLOG_VOLUME_NAME,
};
use crate::{FLUENTD_CONF_KEY, SIDECAR_CONTAINER_NAME};

/// Env var carrying the Elasticsearch endpoint
pub const ELASTICSEARCH_URL_ENV: &str = "ELASTICSEARCH_URL";
/// Env var carrying the Elasticsearch user (secret reference)
pub const ELASTICSEARCH_USER_ENV: &str = "ELASTICSEARCH_USER";
/// Env var carrying the Elasticsearch password (secret reference)
pub const ELASTICSEARCH_PASSWORD_ENV: &str = "ELASTICSEARCH_PASSWORD";

/// Label the application name is read from via the downward API
const APP_NAME_LABEL: &str = "app.oam.dev/name";
/// Label the component name is read from via the downward API
const COMPONENT_NAME_LABEL: &str = "app.oam.dev/component";

/// Mode of the ConfigMap volume (0644)
const CONFIG_VOLUME_MODE: i32 = 420;

/// Builds the sidecar's container, volumes, mounts and ConfigMap
pub struct SidecarSpecBuilder<'a> {
    scope: &'a LoggingScopeConfig,
    profile: &'a SidecarProfile,
}

impl<'a> SidecarSpecBuilder<'a> {
    /// Create a builder for one scope and workload profile
    pub fn new(scope: &'a LoggingScopeConfig, profile: &'a SidecarProfile) -> Self {
        Self { scope, profile }
    }

    /// The sidecar container for a workload
    ///
    /// `extra_env` is appended after the fixed env so adapters can add
    /// workload-specific values without reordering the contract variables.
    pub fn build_container(
        &self,
        workload: &WorkloadRef,
        log_path: &str,
        extra_env: &[EnvVar],
    ) -> Container {
        let mut env = vec![
            literal_env("LOG_PATH", log_path),
            literal_env("FLUENTD_CONF", FLUENTD_CONF_KEY),
            literal_env("FLUENT_ELASTICSEARCH_SED_DISABLE", "true"),
            literal_env(ELASTICSEARCH_URL_ENV, &self.scope.elastic_search_url),
            secret_env(
                ELASTICSEARCH_USER_ENV,
                &self.scope.secret_name,
                ELASTICSEARCH_USERNAME_KEY,
            ),
            secret_env(
                ELASTICSEARCH_PASSWORD_ENV,
                &self.scope.secret_name,
                ELASTICSEARCH_PASSWORD_KEY,
            ),
            literal_env("NAMESPACE", &workload.namespace),
            label_env("APP_CONF_NAME", APP_NAME_LABEL),
            label_env("COMPONENT_NAME", COMPONENT_NAME_LABEL),
            secret_env("CLUSTER_NAME", &self.scope.secret_name, CLUSTER_NAME_KEY),
        ];
        env.extend(extra_env.iter().cloned());

        Container {
            name: SIDECAR_CONTAINER_NAME.to_string(),
            args: Some(vec!["-c".to_string(), "/etc/fluent.conf".to_string()]),
            image: Some(self.scope.fluentd_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            env: Some(env),
            volume_mounts: Some(self.sidecar_mounts()),
            ..Default::default()
        }
    }

    /// Volumes the sidecar needs on the pod
    pub fn build_volumes(&self) -> Vec<Volume> {
        let mut volumes = match &self.profile.mount {
            MountStrategy::ScratchVolume { volume, .. } => vec![Volume {
                name: volume.clone(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }],
            MountStrategy::HostPath => vec![
                host_path_volume(VARLOG_VOLUME_NAME, VARLOG_PATH),
                host_path_volume(CONTAINER_LOGS_VOLUME_NAME, CONTAINER_LOGS_PATH),
            ],
        };
        volumes.push(Volume {
            name: CONFIG_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.profile.config_map.clone(),
                default_mode: Some(CONFIG_VOLUME_MODE),
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes.push(Volume {
            name: SECRET_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.scope.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes
    }

    /// Mounts the application containers share with the sidecar
    pub fn build_shared_mounts(&self) -> Vec<VolumeMount> {
        match &self.profile.mount {
            MountStrategy::ScratchVolume { volume, mount_path } => vec![
                VolumeMount {
                    name: volume.clone(),
                    mount_path: mount_path.clone(),
                    ..Default::default()
                },
                read_only_mount(SECRET_VOLUME_NAME, SECRET_MOUNT_PATH),
            ],
            MountStrategy::HostPath => Vec::new(),
        }
    }

    /// The ConfigMap holding the parsing rules
    pub fn build_config_map(&self, namespace: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.profile.config_map.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                FLUENTD_CONF_KEY.to_string(),
                self.profile.parse_rules.clone(),
            )])),
            ..Default::default()
        }
    }

    /// Names of every volume [`build_volumes`](Self::build_volumes) produces
    pub fn volume_names(&self) -> Vec<String> {
        self.build_volumes().into_iter().map(|v| v.name).collect()
    }

    fn sidecar_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![
            VolumeMount {
                name: CONFIG_VOLUME_NAME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                sub_path: Some(FLUENTD_CONF_KEY.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            read_only_mount(SECRET_VOLUME_NAME, SECRET_MOUNT_PATH),
        ];
        match &self.profile.mount {
            // The shared log volume is read-only for the sidecar
            MountStrategy::ScratchVolume { volume, mount_path } => {
                mounts.push(read_only_mount(volume, mount_path));
            }
            MountStrategy::HostPath => {
                mounts.push(read_only_mount(VARLOG_VOLUME_NAME, VARLOG_PATH));
                mounts.push(read_only_mount(
                    CONTAINER_LOGS_VOLUME_NAME,
                    CONTAINER_LOGS_PATH,
                ));
            }
        }
        mounts
    }
}

/// Plain `name=value` env var
pub fn literal_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

/// Env var resolved from a pod label via the downward API
pub fn label_env(name: &str, label: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: format!("metadata.labels['{label}']"),
                api_version: None,
            }),
            ..Default::default()
        }),
    }
}

/// Env var resolved from an optional secret key; never carries the value itself
fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
    }
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: None,
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}
