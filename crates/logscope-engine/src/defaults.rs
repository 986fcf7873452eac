//! Scope defaulting
//!
//! Fills a scope's empty fields before a pass. On a managed cluster the
//! registration secret names the Elasticsearch endpoint and doubles as the
//! credentials secret.

use tracing::debug;

use logscope_common::config::ScopeDefaults;
use logscope_common::crd::LoggingScopeSpec;
use logscope_common::{ELASTICSEARCH_URL_KEY, REGISTRATION_SECRET_NAME, SYSTEM_NAMESPACE};

use crate::store::ClusterStore;
use crate::Result;

/// Fill empty fields of `spec` in place
///
/// The registration secret is only consulted when the scope names neither
/// an endpoint nor a secret.
pub async fn apply_defaults(
    store: &dyn ClusterStore,
    defaults: &ScopeDefaults,
    spec: &mut LoggingScopeSpec,
) -> Result<()> {
    if spec.fluentd_image.is_empty() {
        spec.fluentd_image = defaults.fluentd_image.clone();
    }

    if spec.effective_url().is_empty() && spec.secret_name.is_empty() {
        if let Some(registration) = store
            .get_secret(SYSTEM_NAMESPACE, REGISTRATION_SECRET_NAME)
            .await?
        {
            debug!("using managed cluster registration for logging defaults");
            spec.elastic_search_url = registration
                .data
                .as_ref()
                .and_then(|data| data.get(ELASTICSEARCH_URL_KEY))
                .map(|url| String::from_utf8_lossy(&url.0).into_owned())
                .unwrap_or_default();
            spec.secret_name = REGISTRATION_SECRET_NAME.to_string();
        }
    }

    if spec.effective_url().is_empty() {
        spec.elastic_search_url = defaults.elastic_search_url.clone();
    }
    if spec.secret_name.is_empty() {
        spec.secret_name = defaults.secret_name.clone();
    }
    Ok(())
}
