//! Workload adapters
//!
//! An adapter knows where a workload kind keeps its pod template. It
//! extracts a [`PodFragment`] from the live object, lets the shared
//! [`SidecarManager`] converge it, and writes the result back.
//!
//! Kind-specific knowledge lives behind [`PodTemplateAccess`]; the
//! apply/remove flow is shared by [`SidecarAdapter`].

mod container;
mod domain;

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use logscope_common::crd::{LoggingScopeConfig, WorkloadRef};

use crate::fragment::PodFragment;
use crate::manager::SidecarManager;
use crate::{Error, Result};

pub use container::ContainerWorkloadAccess;
pub use domain::DomainWorkloadAccess;

/// What the reconciler needs from a workload kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadAdapter: Send + Sync {
    /// Converge the workload's sidecar; returns whether the workload changed
    async fn apply(&self, scope: &LoggingScopeConfig, workload: &WorkloadRef) -> Result<bool>;

    /// Remove the workload's sidecar; returns whether removal is verified
    async fn remove(&self, scope: &LoggingScopeConfig, workload: &WorkloadRef) -> Result<bool>;
}

/// A live workload object paired with the fragment extracted from it
pub struct Extracted<T> {
    /// The object as read, written back by [`PodTemplateAccess::merge`]
    pub object: T,
    /// Its containers, volumes and mounts
    pub fragment: PodFragment,
}

/// Kind-specific access to a workload's pod template
#[async_trait]
pub trait PodTemplateAccess: Send + Sync {
    /// The live object type
    type Object: Send + Sync;

    /// Read the workload and extract its fragment; `None` if it does not exist
    async fn extract(&self, workload: &WorkloadRef) -> Result<Option<Extracted<Self::Object>>>;

    /// Write `fragment` back into `object` and persist it
    async fn merge(&self, object: Self::Object, fragment: PodFragment) -> Result<()>;

    /// Fragment used to clean up after a workload that no longer exists
    fn orphan_fragment(&self, workload: &WorkloadRef) -> PodFragment;
}

/// Drives the [`SidecarManager`] over any [`PodTemplateAccess`]
pub struct SidecarAdapter<A> {
    access: A,
    manager: SidecarManager,
}

impl<A: PodTemplateAccess> SidecarAdapter<A> {
    /// Create an adapter from kind-specific access and a shared manager
    pub fn new(access: A, manager: SidecarManager) -> Self {
        Self { access, manager }
    }
}

#[async_trait]
impl<A: PodTemplateAccess> WorkloadAdapter for SidecarAdapter<A> {
    async fn apply(&self, scope: &LoggingScopeConfig, workload: &WorkloadRef) -> Result<bool> {
        let Some(Extracted { object, mut fragment }) = self.access.extract(workload).await? else {
            return Err(Error::workload_not_found(
                &workload.kind,
                &workload.namespace,
                &workload.name,
            ));
        };

        if !self.manager.apply(scope, workload, &mut fragment).await? {
            return Ok(false);
        }
        self.access.merge(object, fragment).await?;
        info!(workload = %workload, "workload updated with logging sidecar");
        Ok(true)
    }

    async fn remove(&self, scope: &LoggingScopeConfig, workload: &WorkloadRef) -> Result<bool> {
        let Some(Extracted { object, mut fragment }) = self.access.extract(workload).await? else {
            // Nothing to write back, but the ConfigMap may still be around
            debug!(workload = %workload, "workload gone, cleaning up ConfigMap only");
            let mut fragment = self.access.orphan_fragment(workload);
            return self.manager.remove(scope, workload, &mut fragment).await;
        };

        let before = fragment.clone();
        let verified = self.manager.remove(scope, workload, &mut fragment).await?;
        if fragment != before {
            self.access.merge(object, fragment).await?;
            info!(workload = %workload, "logging sidecar removed from workload");
        }
        Ok(verified)
    }
}
