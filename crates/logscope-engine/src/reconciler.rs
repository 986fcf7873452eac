//! Association reconciliation
//!
//! One pass over a LoggingScope: apply the sidecar to every workload the
//! scope references, remove it from workloads that dropped out, and persist
//! the association list. Status is written once, after all workloads have
//! been processed, and is written even when some of them failed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use logscope_common::config::ScopeDefaults;
use logscope_common::crd::{
    LoggingScopeConfig, LoggingScopeSpec, LoggingScopeStatus, WorkloadRef,
};

use crate::controller::ReconcileError;
use crate::defaults::apply_defaults;
use crate::registry::AdapterRegistry;
use crate::store::ClusterStore;
use crate::Error;

/// Result of a pass that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The scope does not exist; nothing to do
    NotFound,
    /// Status was persisted
    Persisted {
        /// Workloads the scope currently references
        associations: usize,
        /// Former workloads whose removal is not yet confirmed
        pending_removals: usize,
    },
}

impl PassOutcome {
    /// Whether another pass is needed to confirm removals
    pub fn has_pending_removals(&self) -> bool {
        matches!(self, Self::Persisted { pending_removals, .. } if *pending_removals > 0)
    }
}

/// Workload references of a scope, in declaration order and without repeats
pub fn resolve_workloads(spec: &LoggingScopeSpec, namespace: &str) -> Vec<WorkloadRef> {
    let mut resolved: Vec<WorkloadRef> = Vec::with_capacity(spec.workload_refs.len());
    for reference in &spec.workload_refs {
        let workload = WorkloadRef::from_reference(reference, namespace);
        if !resolved.contains(&workload) {
            resolved.push(workload);
        }
    }
    resolved
}

/// Previously associated workloads missing from `resolved`, in prior order
pub fn detect_orphans(prior: &[WorkloadRef], resolved: &[WorkloadRef]) -> Vec<WorkloadRef> {
    prior
        .iter()
        .filter(|workload| !resolved.contains(workload))
        .cloned()
        .collect()
}

/// Runs passes for individual scopes
pub struct AssociationReconciler {
    store: Arc<dyn ClusterStore>,
    registry: Arc<AdapterRegistry>,
    defaults: ScopeDefaults,
}

impl AssociationReconciler {
    /// Create a reconciler
    pub fn new(
        store: Arc<dyn ClusterStore>,
        registry: Arc<AdapterRegistry>,
        defaults: ScopeDefaults,
    ) -> Self {
        Self {
            store,
            registry,
            defaults,
        }
    }

    /// Run one pass for the scope `namespace/name`
    ///
    /// Per-workload failures do not stop the pass. They are reported as
    /// [`ReconcileError::Pass`] after status has been written. A scope left
    /// without a fluentd image after defaulting is rejected before any write.
    pub async fn run_pass(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PassOutcome, ReconcileError> {
        let Some(scope) = self.store.get_scope(namespace, name).await? else {
            debug!(scope = %name, namespace = %namespace, "scope not found");
            return Ok(PassOutcome::NotFound);
        };

        let mut spec = scope.spec;
        apply_defaults(self.store.as_ref(), &self.defaults, &mut spec).await?;
        if spec.fluentd_image.is_empty() {
            return Err(ReconcileError::Validation(format!(
                "scope {namespace}/{name} has no fluentd image and no default is configured"
            )));
        }
        let config = spec.config(namespace);

        let resolved = resolve_workloads(&spec, namespace);
        let mut errors = Vec::new();
        for workload in &resolved {
            if let Err(e) = self.apply_one(&config, workload).await {
                warn!(workload = %workload, error = %e, "failed to apply logging sidecar");
                errors.push(e);
            }
        }

        let prior = scope.status.map(|s| s.resources).unwrap_or_default();
        let mut pending = Vec::new();
        for orphan in detect_orphans(&prior, &resolved) {
            match self.remove_one(&config, &orphan).await {
                Ok(true) => info!(workload = %orphan, "association removed"),
                Ok(false) => {
                    debug!(workload = %orphan, "removal not yet verified");
                    pending.push(orphan);
                }
                Err(e) => {
                    warn!(workload = %orphan, error = %e, "failed to remove logging sidecar");
                    pending.push(orphan);
                    errors.push(e);
                }
            }
        }

        let outcome = PassOutcome::Persisted {
            associations: resolved.len(),
            pending_removals: pending.len(),
        };
        let mut resources = resolved;
        resources.extend(pending);
        self.store
            .patch_scope_status(namespace, name, &LoggingScopeStatus { resources })
            .await?;

        let failed = errors.len();
        match errors.into_iter().next() {
            Some(first) => Err(ReconcileError::Pass { failed, first }),
            None => Ok(outcome),
        }
    }

    async fn apply_one(
        &self,
        config: &LoggingScopeConfig,
        workload: &WorkloadRef,
    ) -> Result<(), Error> {
        let Some(adapter) = self.registry.resolve_ref(workload) else {
            warn!(
                workload = %workload,
                kind = %workload.handler_key(),
                "no adapter for workload kind, skipping"
            );
            return Ok(());
        };
        adapter.apply(config, workload).await.map(|_| ())
    }

    /// Whether the orphan may be forgotten
    async fn remove_one(
        &self,
        config: &LoggingScopeConfig,
        orphan: &WorkloadRef,
    ) -> Result<bool, Error> {
        // Nothing can have been applied to a kind without an adapter
        let Some(adapter) = self.registry.resolve_ref(orphan) else {
            warn!(
                workload = %orphan,
                kind = %orphan.handler_key(),
                "no adapter for orphaned workload kind, dropping"
            );
            return Ok(true);
        };
        adapter.remove(config, orphan).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::{always, eq};

    use super::*;
    use crate::adapter::MockWorkloadAdapter;
    use crate::testing::MemoryStore;
    use crate::SIDECAR_CONTAINER_NAME;
    use logscope_common::crd::{LoggingScope, TypedReference};

    const NS: &str = "apps";
    const SCOPE: &str = "logging";

    fn defaults() -> ScopeDefaults {
        ScopeDefaults {
            fluentd_image: "fluentd:default".to_string(),
            elastic_search_url: "http://default-es:8775".to_string(),
            secret_name: "default-secret".to_string(),
        }
    }

    fn reference(kind: &str, name: &str) -> TypedReference {
        let api_version = match kind {
            "Deployment" => "apps/v1",
            "Domain" => "weblogic.oracle/v8",
            _ => "example.com/v1",
        };
        TypedReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    fn workload(kind: &str, name: &str) -> WorkloadRef {
        WorkloadRef::from_reference(&reference(kind, name), NS)
    }

    fn scope(refs: Vec<TypedReference>, prior: Vec<WorkloadRef>) -> LoggingScope {
        let mut scope = LoggingScope::new(
            SCOPE,
            LoggingScopeSpec {
                fluentd_image: "fluentd:1".to_string(),
                elastic_search_url: "http://es:9200".to_string(),
                secret_name: "es-secret".to_string(),
                workload_refs: refs,
                ..Default::default()
            },
        );
        scope.metadata.namespace = Some(NS.to_string());
        scope.status = Some(LoggingScopeStatus { resources: prior });
        scope
    }

    fn reconciler(store: Arc<MemoryStore>, registry: AdapterRegistry) -> AssociationReconciler {
        AssociationReconciler::new(store, Arc::new(registry), defaults())
    }

    fn registry_with(kind: &str, adapter: MockWorkloadAdapter) -> AdapterRegistry {
        let registry = AdapterRegistry::new();
        let group = workload(kind, "x").group().to_string();
        registry.register(&group, kind, Arc::new(adapter));
        registry
    }

    fn persisted(store: &MemoryStore) -> Vec<String> {
        store
            .scope(NS, SCOPE)
            .and_then(|s| s.status)
            .map(|s| s.resources.iter().map(|w| w.name.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn resolve_workloads_keeps_order_and_drops_repeats() {
        let spec = LoggingScopeSpec {
            workload_refs: vec![
                reference("Deployment", "b"),
                reference("Deployment", "a"),
                reference("Deployment", "b"),
            ],
            ..Default::default()
        };
        let resolved = resolve_workloads(&spec, NS);
        let names: Vec<_> = resolved.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(resolved.iter().all(|w| w.namespace == NS));
    }

    #[test]
    fn detect_orphans_returns_prior_refs_not_resolved() {
        let prior = vec![workload("Deployment", "a"), workload("Deployment", "b")];
        let resolved = vec![workload("Deployment", "b"), workload("Deployment", "c")];
        assert_eq!(detect_orphans(&prior, &resolved), vec![workload("Deployment", "a")]);
    }

    #[test]
    fn same_name_different_kind_is_an_orphan() {
        let prior = vec![workload("Domain", "a")];
        let resolved = vec![workload("Deployment", "a")];
        assert_eq!(detect_orphans(&prior, &resolved).len(), 1);
    }

    #[tokio::test]
    async fn missing_scope_is_terminal_success() {
        let store = Arc::new(MemoryStore::default());
        let outcome = reconciler(store.clone(), AdapterRegistry::new())
            .run_pass(NS, SCOPE)
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::NotFound);
        assert_eq!(store.status_writes(), 0);
    }

    // ==========================================================================
    // Story Tests: Orphan handling
    // ==========================================================================

    /// Story: an orphan whose removal is not verified stays in status
    #[tokio::test]
    async fn story_unverified_orphan_is_retained() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(vec![], vec![workload("Deployment", "old")]));

        let mut adapter = MockWorkloadAdapter::new();
        adapter.expect_remove().times(1).returning(|_, _| Ok(false));
        let outcome = reconciler(store.clone(), registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap();

        assert!(outcome.has_pending_removals());
        assert_eq!(persisted(&store), vec!["old"]);
    }

    /// Story: a verified orphan is forgotten
    #[tokio::test]
    async fn story_verified_orphan_is_dropped() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(
            vec![reference("Deployment", "kept")],
            vec![workload("Deployment", "kept"), workload("Deployment", "old")],
        ));

        let mut adapter = MockWorkloadAdapter::new();
        adapter.expect_apply().returning(|_, _| Ok(false));
        adapter
            .expect_remove()
            .withf(|_, w| w.name == "old")
            .times(1)
            .returning(|_, _| Ok(true));
        let outcome = reconciler(store.clone(), registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PassOutcome::Persisted {
                associations: 1,
                pending_removals: 0
            }
        );
        assert_eq!(persisted(&store), vec!["kept"]);
    }

    /// Story: a failed removal keeps the orphan and fails the pass
    #[tokio::test]
    async fn story_failed_removal_retains_orphan() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(vec![], vec![workload("Deployment", "old")]));

        let mut adapter = MockWorkloadAdapter::new();
        adapter
            .expect_remove()
            .returning(|_, _| Err(Error::internal("delete failed")));
        let err = reconciler(store.clone(), registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Pass { failed: 1, .. }));
        assert_eq!(persisted(&store), vec!["old"]);
        assert_eq!(store.status_writes(), 1);
    }

    /// Story: a ConfigMap that cannot be deleted keeps the orphan and fails
    /// the pass after status is written
    #[tokio::test]
    async fn story_failed_config_map_delete_fails_pass() {
        let store = Arc::new(MemoryStore::default());
        store.insert_deployment(deployment("web"));
        store.insert_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some("fluentd-config-helidon-web".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        store.fail_writes_to("fluentd-config-helidon-web");
        store.insert_scope(scope(vec![], vec![workload("Deployment", "web")]));

        let registry = AdapterRegistry::with_builtin(store.clone());
        let err = reconciler(store.clone(), registry)
            .run_pass(NS, SCOPE)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Pass { failed: 1, .. }));
        assert!(store.config_map(NS, "fluentd-config-helidon-web").is_some());
        assert_eq!(persisted(&store), vec!["web"]);
        assert_eq!(store.status_writes(), 1);
    }

    /// Story: an orphan of a kind nobody handles is dropped
    #[tokio::test]
    async fn story_unknown_orphan_kind_is_dropped() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(vec![], vec![workload("Widget", "old")]));

        reconciler(store.clone(), AdapterRegistry::new())
            .run_pass(NS, SCOPE)
            .await
            .unwrap();
        assert!(persisted(&store).is_empty());
    }

    // ==========================================================================
    // Story Tests: Apply and error accumulation
    // ==========================================================================

    /// Story: one failing workload does not stop its siblings, and status is
    /// still written before the pass reports failure
    #[tokio::test]
    async fn story_apply_errors_accumulate() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(
            vec![
                reference("Deployment", "a"),
                reference("Deployment", "b"),
                reference("Deployment", "c"),
            ],
            vec![],
        ));

        let mut adapter = MockWorkloadAdapter::new();
        adapter.expect_apply().times(3).returning(|_, w| {
            if w.name == "b" {
                Err(Error::workload_not_found(&w.kind, &w.namespace, &w.name))
            } else {
                Ok(true)
            }
        });
        let err = reconciler(store.clone(), registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap_err();

        match err {
            ReconcileError::Pass { failed, first } => {
                assert_eq!(failed, 1);
                assert!(matches!(first, Error::WorkloadNotFound { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(persisted(&store), vec!["a", "b", "c"]);
    }

    /// Story: workloads are applied in declaration order
    #[tokio::test]
    async fn story_apply_order_is_deterministic() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(
            vec![
                reference("Deployment", "z"),
                reference("Deployment", "a"),
                reference("Deployment", "m"),
            ],
            vec![],
        ));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let mut adapter = MockWorkloadAdapter::new();
        adapter.expect_apply().returning(move |_, w| {
            record.lock().unwrap().push(w.name.clone());
            Ok(true)
        });
        reconciler(store.clone(), registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["z", "a", "m"]);
    }

    /// Story: an unknown workload kind is skipped, not failed, and stays
    /// associated
    #[tokio::test]
    async fn story_unknown_kind_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(
            vec![reference("Widget", "w"), reference("Deployment", "d")],
            vec![],
        ));

        let mut adapter = MockWorkloadAdapter::new();
        adapter.expect_apply().times(1).returning(|_, _| Ok(true));
        reconciler(store.clone(), registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap();

        assert_eq!(persisted(&store), vec!["w", "d"]);
    }

    /// Story: the scope's empty fields are defaulted before workloads see it
    #[tokio::test]
    async fn story_defaults_reach_adapters() {
        let store = Arc::new(MemoryStore::default());
        let mut empty = scope(vec![reference("Deployment", "d")], vec![]);
        empty.spec.fluentd_image.clear();
        empty.spec.elastic_search_url.clear();
        empty.spec.secret_name.clear();
        store.insert_scope(empty);

        let mut adapter = MockWorkloadAdapter::new();
        adapter
            .expect_apply()
            .with(
                eq(LoggingScopeConfig {
                    fluentd_image: "fluentd:default".to_string(),
                    elastic_search_url: "http://default-es:8775".to_string(),
                    secret_name: "default-secret".to_string(),
                    secret_namespace: NS.to_string(),
                }),
                always(),
            )
            .times(1)
            .returning(|_, _| Ok(true));
        reconciler(store, registry_with("Deployment", adapter))
            .run_pass(NS, SCOPE)
            .await
            .unwrap();
    }

    /// Story: without any fluentd image the pass is rejected before any
    /// workload or status is written
    #[tokio::test]
    async fn story_missing_image_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        store.insert_deployment(deployment("web"));
        let mut unset = scope(vec![reference("Deployment", "web")], vec![]);
        unset.spec.fluentd_image.clear();
        store.insert_scope(unset);

        let mut no_image = defaults();
        no_image.fluentd_image.clear();
        let registry = AdapterRegistry::with_builtin(store.clone());
        let err = AssociationReconciler::new(store.clone(), Arc::new(registry), no_image)
            .run_pass(NS, SCOPE)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(containers(&store, "web"), vec!["app"]);
        assert_eq!(store.workload_writes(), 0);
        assert_eq!(store.status_writes(), 0);
    }

    /// Story: a failed status write fails the pass
    #[tokio::test]
    async fn story_status_write_failure_is_reported() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(vec![], vec![]));
        store.fail_writes_to(SCOPE);

        let err = reconciler(store, AdapterRegistry::new())
            .run_pass(NS, SCOPE)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Common(_)));
    }

    // ==========================================================================
    // Story Tests: Multi-pass lifecycle against the in-memory cluster
    // ==========================================================================

    fn deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "app".to_string(),
                            image: Some("app:1".to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn containers(store: &MemoryStore, name: &str) -> Vec<String> {
        store
            .deployment(NS, name)
            .and_then(|d| d.spec)
            .and_then(|s| s.template.spec)
            .map(|p| p.containers.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }

    fn set_refs(store: &MemoryStore, refs: Vec<TypedReference>) {
        let mut current = store.scope(NS, SCOPE).unwrap();
        current.spec.workload_refs = refs;
        store.insert_scope(current);
    }

    /// Story: associate, dissociate, and confirm across three passes
    #[tokio::test]
    async fn story_association_lifecycle() {
        let store = Arc::new(MemoryStore::default());
        store.insert_deployment(deployment("web"));
        store.insert_scope(scope(vec![reference("Deployment", "web")], vec![]));
        let registry = AdapterRegistry::with_builtin(store.clone());
        let reconciler = reconciler(store.clone(), registry);

        // Pass 1: sidecar injected and association recorded
        reconciler.run_pass(NS, SCOPE).await.unwrap();
        assert_eq!(containers(&store, "web"), vec!["app", SIDECAR_CONTAINER_NAME]);
        assert!(store.config_map(NS, "fluentd-config-helidon-web").is_some());
        assert_eq!(persisted(&store), vec!["web"]);

        // Pass 2: unchanged scope writes nothing to the workload
        reconciler.run_pass(NS, SCOPE).await.unwrap();
        assert_eq!(store.workload_writes(), 1);

        // Pass 3: dropped from the scope, sidecar removed, not yet verified
        set_refs(&store, vec![]);
        let outcome = reconciler.run_pass(NS, SCOPE).await.unwrap();
        assert!(outcome.has_pending_removals());
        assert_eq!(containers(&store, "web"), vec!["app"]);
        assert!(store.config_map(NS, "fluentd-config-helidon-web").is_none());
        assert_eq!(persisted(&store), vec!["web"]);

        // Pass 4: ConfigMap confirmed gone, association forgotten
        let outcome = reconciler.run_pass(NS, SCOPE).await.unwrap();
        assert!(!outcome.has_pending_removals());
        assert!(persisted(&store).is_empty());
        assert_eq!(store.status_writes(), 4);
    }

    /// Story: on a managed cluster an unconfigured scope ships to the admin
    /// cluster with the registration credentials copied next to the workload
    #[tokio::test]
    async fn story_managed_cluster_uses_registration_secret() {
        use k8s_openapi::api::core::v1::Secret;
        use k8s_openapi::ByteString;
        use logscope_common::{ELASTICSEARCH_URL_KEY, REGISTRATION_SECRET_NAME, SYSTEM_NAMESPACE};

        let store = Arc::new(MemoryStore::default());
        store.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some(REGISTRATION_SECRET_NAME.to_string()),
                namespace: Some(SYSTEM_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(std::collections::BTreeMap::from([(
                ELASTICSEARCH_URL_KEY.to_string(),
                ByteString(b"https://admin-es:9200".to_vec()),
            )])),
            ..Default::default()
        });
        store.insert_deployment(deployment("web"));
        let mut unconfigured = scope(vec![reference("Deployment", "web")], vec![]);
        unconfigured.spec.elastic_search_url.clear();
        unconfigured.spec.secret_name.clear();
        store.insert_scope(unconfigured);

        let registry = AdapterRegistry::with_builtin(store.clone());
        reconciler(store.clone(), registry)
            .run_pass(NS, SCOPE)
            .await
            .unwrap();

        let copied = store.secret(NS, REGISTRATION_SECRET_NAME).unwrap();
        assert!(copied.data.unwrap().contains_key(ELASTICSEARCH_URL_KEY));

        let sidecar = store
            .deployment(NS, "web")
            .and_then(|d| d.spec)
            .and_then(|s| s.template.spec)
            .and_then(|p| {
                p.containers
                    .into_iter()
                    .find(|c| c.name == SIDECAR_CONTAINER_NAME)
            })
            .unwrap();
        let url = sidecar
            .env
            .unwrap()
            .into_iter()
            .find(|e| e.name == "ELASTICSEARCH_URL")
            .and_then(|e| e.value);
        assert_eq!(url.as_deref(), Some("https://admin-es:9200"));
    }

    /// Story: a workload that fails to apply is retried on the next pass
    #[tokio::test]
    async fn story_missing_workload_converges_once_created() {
        let store = Arc::new(MemoryStore::default());
        store.insert_scope(scope(vec![reference("Deployment", "late")], vec![]));
        let registry = AdapterRegistry::with_builtin(store.clone());
        let reconciler = reconciler(store.clone(), registry);

        assert!(reconciler.run_pass(NS, SCOPE).await.is_err());
        assert_eq!(persisted(&store), vec!["late"]);

        store.insert_deployment(deployment("late"));
        reconciler.run_pass(NS, SCOPE).await.unwrap();
        assert_eq!(containers(&store, "late"), vec!["app", SIDECAR_CONTAINER_NAME]);
    }
}
