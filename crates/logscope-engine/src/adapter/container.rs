//! Generic-container adapter
//!
//! Workloads whose pod template is a plain Deployment. The sidecar tails the
//! node's container log files through host-path volumes, so each workload
//! gets its own ConfigMap with one rule section per application container.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PodSpec;

use logscope_common::crd::WorkloadRef;

use super::{Extracted, PodTemplateAccess};
use crate::builder::literal_env;
use crate::fragment::{MountStrategy, PodFragment, SidecarProfile};
use crate::parse_rules::container_workload_rules;
use crate::store::ClusterStore;
use crate::{Error, Result, SIDECAR_CONTAINER_NAME};

/// Workload type used in ConfigMap names
const WORKLOAD_TYPE: &str = "helidon";

/// Reads and writes the pod template of the Deployment backing a workload
///
/// The Deployment has the workload's name and namespace.
pub struct ContainerWorkloadAccess {
    store: Arc<dyn ClusterStore>,
}

impl ContainerWorkloadAccess {
    /// Create access backed by the given store
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    fn profile(workload: &WorkloadRef, app_containers: &[String]) -> SidecarProfile {
        SidecarProfile {
            mount: MountStrategy::HostPath,
            config_map: config_map_name(&workload.name),
            parse_rules: container_workload_rules(&workload.name, app_containers),
        }
    }
}

/// Per-workload ConfigMap name
pub fn config_map_name(workload: &str) -> String {
    format!("fluentd-config-{WORKLOAD_TYPE}-{workload}")
}

fn pod_spec_mut(deployment: &mut Deployment) -> Option<&mut PodSpec> {
    deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
}

#[async_trait::async_trait]
impl PodTemplateAccess for ContainerWorkloadAccess {
    type Object = Deployment;

    async fn extract(&self, workload: &WorkloadRef) -> Result<Option<Extracted<Deployment>>> {
        let Some(mut deployment) = self
            .store
            .get_deployment(&workload.namespace, &workload.name)
            .await?
        else {
            return Ok(None);
        };

        let pod = pod_spec_mut(&mut deployment).ok_or_else(|| {
            Error::invalid_workload(workload.to_string(), "deployment has no pod template spec")
        })?;
        let containers = std::mem::take(&mut pod.containers);
        let volumes = pod.volumes.take().unwrap_or_default();

        let mut fragment = PodFragment::empty(Self::profile(workload, &[]));
        fragment.containers = containers;
        fragment.volumes = volumes;
        // Rules cover the application containers present right now
        let app_containers = fragment.container_names_except(SIDECAR_CONTAINER_NAME);
        fragment.profile = Self::profile(workload, &app_containers);
        fragment.log_path = format!("/var/log/containers/{}*.log", workload.name);
        fragment.handler_env = vec![literal_env("WORKLOAD_NAME", &workload.name)];

        Ok(Some(Extracted {
            object: deployment,
            fragment,
        }))
    }

    async fn merge(&self, mut deployment: Deployment, fragment: PodFragment) -> Result<()> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let pod = pod_spec_mut(&mut deployment)
            .ok_or_else(|| Error::invalid_workload(name, "deployment has no pod template spec"))?;
        pod.containers = fragment.containers;
        pod.volumes = (!fragment.volumes.is_empty()).then_some(fragment.volumes);
        self.store.update_deployment(&deployment).await
    }

    fn orphan_fragment(&self, workload: &WorkloadRef) -> PodFragment {
        PodFragment::empty(Self::profile(workload, &[]))
    }
}
