//! kube-runtime entry points for LoggingScope
//!
//! [`reconcile`] runs one association pass per scope event; [`error_policy`]
//! decides when a failed pass is retried.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{error, info, instrument};

use logscope_common::config::ScopeDefaults;
use logscope_common::crd::LoggingScope;

use crate::reconciler::{AssociationReconciler, PassOutcome};
use crate::registry::AdapterRegistry;
use crate::store::{ClusterStore, KubeClusterStore};

/// Default delay before retrying a failed pass or confirming removals
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(30);

/// Delay before retrying a pass that failed in a way retrying will not fix
pub const PERMANENT_FAILURE_REQUEUE: Duration = Duration::from_secs(300);

/// Reconciliation failure
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The scope object itself is unusable
    #[error("validation error: {0}")]
    Validation(String),

    /// A store call outside the per-workload loop failed
    #[error(transparent)]
    Common(#[from] logscope_common::Error),

    /// Some workloads failed; status was still persisted
    #[error("{failed} workload(s) failed, first: {first}")]
    Pass {
        /// Number of failed apply/remove calls
        failed: usize,
        /// The first failure, in processing order
        #[source]
        first: logscope_common::Error,
    },
}

impl ReconcileError {
    /// Whether retrying soon may succeed; a failed pass is judged by its
    /// first failure
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Common(e) => e.is_retryable(),
            Self::Pass { first, .. } => first.is_retryable(),
        }
    }
}

/// Shared context for the LoggingScope controller
pub struct ScopeContext {
    /// Runs the passes
    pub reconciler: AssociationReconciler,
    /// Delay used for retries and pending removals
    pub requeue: Duration,
}

impl ScopeContext {
    /// Create a context from its parts
    pub fn new(reconciler: AssociationReconciler, requeue: Duration) -> Self {
        Self {
            reconciler,
            requeue,
        }
    }

    /// Wire the built-in adapters to a live cluster
    pub fn from_client(client: Client, defaults: ScopeDefaults, requeue: Duration) -> Self {
        let store: Arc<dyn ClusterStore> = Arc::new(KubeClusterStore::new(client));
        let registry = Arc::new(AdapterRegistry::with_builtin(store.clone()));
        Self::new(AssociationReconciler::new(store, registry, defaults), requeue)
    }
}

/// Reconcile a LoggingScope
#[instrument(skip(scope, ctx), fields(scope = %scope.name_any()))]
pub async fn reconcile(
    scope: Arc<LoggingScope>,
    ctx: Arc<ScopeContext>,
) -> Result<Action, ReconcileError> {
    let name = scope.name_any();
    let namespace = scope
        .namespace()
        .ok_or_else(|| ReconcileError::Validation("LoggingScope missing namespace".into()))?;

    match ctx.reconciler.run_pass(&namespace, &name).await? {
        PassOutcome::NotFound => Ok(Action::await_change()),
        outcome if outcome.has_pending_removals() => {
            info!(?outcome, "waiting for removals to be confirmed");
            Ok(Action::requeue(ctx.requeue))
        }
        outcome => {
            info!(?outcome, "logging scope converged");
            Ok(Action::await_change())
        }
    }
}

/// Error policy: transient failures retry after the configured delay,
/// permanent ones back off to [`PERMANENT_FAILURE_REQUEUE`]
pub fn error_policy(
    scope: Arc<LoggingScope>,
    error: &ReconcileError,
    ctx: Arc<ScopeContext>,
) -> Action {
    let retryable = error.is_retryable();
    error!(
        ?error,
        retryable,
        scope = %scope.name_any(),
        "logging scope reconciliation failed"
    );
    if retryable {
        Action::requeue(ctx.requeue)
    } else {
        Action::requeue(PERMANENT_FAILURE_REQUEUE.max(ctx.requeue))
    }
}
