//! Adapter registry
//!
//! Maps a workload's `(group, kind)` to the adapter that knows its pod
//! template. Built-in kinds are registered at startup; more can be added at
//! runtime with [`AdapterRegistry::register`].

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use logscope_common::crd::WorkloadRef;

use crate::adapter::{
    ContainerWorkloadAccess, DomainWorkloadAccess, SidecarAdapter, WorkloadAdapter,
};
use crate::manager::SidecarManager;
use crate::store::ClusterStore;

/// Workload kinds with a built-in adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// ContainerizedWorkload (core.oam.dev)
    ContainerizedWorkload,
    /// Deployment (apps)
    Deployment,
    /// Domain (weblogic.oracle)
    Domain,
}

/// All AdapterKind variants for iteration.
pub const ALL_ADAPTER_KINDS: &[AdapterKind] = &[
    AdapterKind::ContainerizedWorkload,
    AdapterKind::Deployment,
    AdapterKind::Domain,
];

impl AdapterKind {
    /// API group of the workload kind
    pub fn group(&self) -> &'static str {
        match self {
            Self::ContainerizedWorkload => "core.oam.dev",
            Self::Deployment => "apps",
            Self::Domain => "weblogic.oracle",
        }
    }

    /// Kubernetes Kind string
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::ContainerizedWorkload => "ContainerizedWorkload",
            Self::Deployment => "Deployment",
            Self::Domain => "Domain",
        }
    }
}

type Key = (String, String);

/// Adapters keyed by `(group, kind)`
#[derive(Default)]
pub struct AdapterRegistry {
    entries: DashMap<Key, Arc<dyn WorkloadAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every [`AdapterKind`] wired to `store`
    pub fn with_builtin(store: Arc<dyn ClusterStore>) -> Self {
        let manager = SidecarManager::from_store(store.clone());
        let container: Arc<dyn WorkloadAdapter> = Arc::new(SidecarAdapter::new(
            ContainerWorkloadAccess::new(store.clone()),
            manager.clone(),
        ));
        let domain: Arc<dyn WorkloadAdapter> = Arc::new(SidecarAdapter::new(
            DomainWorkloadAccess::new(store),
            manager,
        ));

        let registry = Self::new();
        for kind in ALL_ADAPTER_KINDS {
            let adapter = match kind {
                AdapterKind::ContainerizedWorkload | AdapterKind::Deployment => container.clone(),
                AdapterKind::Domain => domain.clone(),
            };
            registry.register(kind.group(), kind.kind_str(), adapter);
        }
        registry
    }

    /// Register or replace the adapter for a kind
    pub fn register(&self, group: &str, kind: &str, adapter: Arc<dyn WorkloadAdapter>) {
        debug!(group, kind, "registering workload adapter");
        self.entries.insert((group.to_string(), kind.to_string()), adapter);
    }

    /// The adapter for an `apiVersion` and kind; any version of a group matches
    pub fn resolve(&self, api_version: &str, kind: &str) -> Option<Arc<dyn WorkloadAdapter>> {
        let group = api_version.rsplit_once('/').map_or("", |(group, _)| group);
        self.entries
            .get(&(group.to_string(), kind.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// The adapter for a workload
    pub fn resolve_ref(&self, workload: &WorkloadRef) -> Option<Arc<dyn WorkloadAdapter>> {
        self.resolve(&workload.api_version, &workload.kind)
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no kinds are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
