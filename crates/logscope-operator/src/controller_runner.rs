//! Controller runner - installs the CRD and drives the LoggingScope controller

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};

use logscope_common::config::ScopeDefaults;
use logscope_common::crd::LoggingScope;
use logscope_common::FIELD_MANAGER;
use logscope_engine::{error_policy, reconcile, ScopeContext};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Install or update the LoggingScope CRD with server-side apply
pub async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = LoggingScope::crd();
    let name = crd.name_any();

    tracing::info!(crd = %name, "Installing LoggingScope CRD...");
    crds.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&crd))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    Ok(())
}

/// Run the LoggingScope controller until a shutdown signal arrives
pub async fn run(client: Client, defaults: ScopeDefaults, requeue: Duration) {
    let scopes: Api<LoggingScope> = Api::all(client.clone());
    let ctx = Arc::new(ScopeContext::from_client(client, defaults, requeue));

    Controller::new(scopes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("LoggingScope"))
        .await;
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
