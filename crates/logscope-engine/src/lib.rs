//! Logging sidecar lifecycle engine
//!
//! Keeps a log collector sidecar converged with the `LoggingScope` that
//! references a workload, and removes it once the association ends:
//!
//! - **Spec building**: desired sidecar container, volumes and ConfigMap
//! - **Convergence**: diff-based apply and verified removal on a pod fragment
//! - **Adapters**: pod fragment extraction and write-back per workload kind
//! - **Reconciliation**: per-scope passes that persist the association list

#![deny(missing_docs)]

pub mod adapter;
pub mod builder;
pub mod controller;
pub mod defaults;
pub mod fragment;
pub mod manager;
pub mod parse_rules;
pub mod reconciler;
pub mod registry;
pub mod secret;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub(crate) use logscope_common::{Error, Result};

pub use adapter::{SidecarAdapter, WorkloadAdapter};
pub use controller::{error_policy, reconcile, ReconcileError, ScopeContext};
pub use fragment::{MountStrategy, PodFragment, SidecarProfile};
pub use manager::SidecarManager;
pub use reconciler::{AssociationReconciler, PassOutcome};
pub use registry::{AdapterKind, AdapterRegistry};
pub use secret::SecretReplicator;
pub use store::{ClusterStore, KubeClusterStore};

/// Reserved name of the log collector sidecar container
pub const SIDECAR_CONTAINER_NAME: &str = "fluentd";

/// ConfigMap key holding the collector's parsing rules
pub const FLUENTD_CONF_KEY: &str = "fluentd.conf";
