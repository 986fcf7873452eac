//! Pod fragments and the sidecar profile an adapter contributes
//!
//! A [`PodFragment`] is the containers/volumes/mounts slice of a workload's
//! pod template. Adapters extract it at the start of a pass, the
//! [`SidecarManager`](crate::SidecarManager) mutates it, and adapters write it
//! back. It is never persisted on its own.

use k8s_openapi::api::core::v1::{Container, EnvVar, Volume, VolumeMount};

/// Volume holding the collector's parsing rules
pub const CONFIG_VOLUME_NAME: &str = "fluentd-config-volume";

/// Volume holding the Elasticsearch credentials
pub const SECRET_VOLUME_NAME: &str = "secret-volume";

/// Where the credentials secret is mounted
pub const SECRET_MOUNT_PATH: &str = "/fluentd/secret";

/// Where the parsing rules are mounted in the sidecar
pub const CONFIG_MOUNT_PATH: &str = "/fluentd/etc/fluentd.conf";

/// Host-path volume exposing node logs
pub const VARLOG_VOLUME_NAME: &str = "varlog";

/// Node log directory
pub const VARLOG_PATH: &str = "/var/log";

/// Host-path volume exposing the container runtime's log directory
pub const CONTAINER_LOGS_VOLUME_NAME: &str = "datadockercontainers";

/// Container runtime log directory on the node
pub const CONTAINER_LOGS_PATH: &str = "/u01/data/docker/containers";

/// How the sidecar reaches the application's log files
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountStrategy {
    /// The application writes logs into a shared volume the sidecar tails.
    ///
    /// Volumes and mounts are kept on removal: once a runtime has been told
    /// to log there it cannot be switched back.
    ScratchVolume {
        /// Name of the shared volume
        volume: String,
        /// Mount path of the shared volume in both containers
        mount_path: String,
    },
    /// The sidecar tails container logs from the node's filesystem.
    HostPath,
}

impl MountStrategy {
    /// Whether removal keeps the volumes and mounts this strategy adds
    pub fn retains_volumes_on_remove(&self) -> bool {
        matches!(self, Self::ScratchVolume { .. })
    }
}

/// Sidecar settings that depend on the workload kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarProfile {
    /// How logs are shared with the sidecar
    pub mount: MountStrategy,
    /// Name of the ConfigMap holding the parsing rules
    pub config_map: String,
    /// Parsing rules written into the ConfigMap when it is created
    pub parse_rules: String,
}

/// The mutable pod-template slice the sidecar is injected into
#[derive(Clone, Debug, PartialEq)]
pub struct PodFragment {
    /// Pod containers, in template order
    pub containers: Vec<Container>,
    /// Pod volumes, in template order
    pub volumes: Vec<Volume>,
    /// Volume mounts shared by the application containers
    pub volume_mounts: Vec<VolumeMount>,
    /// Extra sidecar env contributed by the adapter, appended last
    pub handler_env: Vec<EnvVar>,
    /// Value of the sidecar's `LOG_PATH`
    pub log_path: String,
    /// Kind-specific sidecar settings
    pub profile: SidecarProfile,
}

impl PodFragment {
    /// An empty fragment using the given profile
    pub fn empty(profile: SidecarProfile) -> Self {
        Self {
            containers: Vec::new(),
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            handler_env: Vec::new(),
            log_path: String::new(),
            profile,
        }
    }

    /// Index of the container with the given name
    pub fn container_index(&self, name: &str) -> Option<usize> {
        self.containers.iter().position(|c| c.name == name)
    }

    /// Names of all containers except the given one, in order
    pub fn container_names_except(&self, excluded: &str) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| c.name != excluded)
            .map(|c| c.name.clone())
            .collect()
    }
}
