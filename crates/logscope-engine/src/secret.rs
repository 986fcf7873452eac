//! Credentials secret replication
//!
//! The sidecar references the scope's credentials secret through optional
//! env references and a secret volume, so the secret must exist in every
//! workload namespace. On a managed cluster the registration secret is the
//! source of truth and its data is copied over.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use logscope_common::crd::LoggingScopeConfig;
use logscope_common::{REGISTRATION_SECRET_NAME, SYSTEM_NAMESPACE};

use crate::store::ClusterStore;
use crate::Result;

/// Ensures the logging credentials secret exists in a namespace
#[derive(Clone)]
pub struct SecretReplicator {
    store: Arc<dyn ClusterStore>,
}

impl SecretReplicator {
    /// Create a replicator backed by the given store
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Make sure `scope.secret_name` exists in `namespace`
    ///
    /// An existing secret is never modified. A missing one is created as a
    /// copy of the registration secret when the scope names it, otherwise as
    /// an empty placeholder so the optional references resolve to nothing.
    pub async fn ensure(&self, namespace: &str, scope: &LoggingScopeConfig) -> Result<()> {
        let name = scope.secret_name.as_str();
        if self.store.get_secret(namespace, name).await?.is_some() {
            debug!(namespace = %namespace, secret = %name, "logging secret present");
            return Ok(());
        }

        let data = if name == REGISTRATION_SECRET_NAME {
            self.store
                .get_secret(SYSTEM_NAMESPACE, REGISTRATION_SECRET_NAME)
                .await?
                .and_then(|source| source.data)
        } else {
            None
        };

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data,
            ..Default::default()
        };

        match self.store.create_secret(&secret).await {
            Ok(()) => {
                info!(
                    namespace = %namespace,
                    secret = %name,
                    copied = secret.data.is_some(),
                    "created logging secret"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
