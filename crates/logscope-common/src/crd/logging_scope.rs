//! LoggingScope CRD types
//!
//! A `LoggingScope` says where the logs of a set of workloads are shipped,
//! with which credentials, and by which log collector image.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{TypedReference, WorkloadRef};

/// Port assumed when only an Elasticsearch host is configured
const DEFAULT_ELASTICSEARCH_PORT: u16 = 9200;

// =============================================================================
// CRD
// =============================================================================

/// Log shipping configuration applied to a set of workloads
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "oam.verrazzano.io",
    version = "v1alpha1",
    kind = "LoggingScope",
    plural = "loggingscopes",
    namespaced,
    status = "LoggingScopeStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.fluentdImage"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LoggingScopeSpec {
    /// Log collector image run as the sidecar
    #[serde(default)]
    pub fluentd_image: String,

    /// Elasticsearch endpoint logs are shipped to
    #[serde(default, rename = "elasticSearchURL")]
    pub elastic_search_url: String,

    /// Elasticsearch host, used when no URL is given
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub elastic_search_host: String,

    /// Elasticsearch port, used with `elasticSearchHost`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_search_port: Option<u16>,

    /// Secret holding the Elasticsearch credentials
    #[serde(default)]
    pub secret_name: String,

    /// Workloads this scope applies to
    #[serde(default)]
    pub workload_refs: Vec<TypedReference>,
}

/// Observed state of a LoggingScope
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingScopeStatus {
    /// Workloads that currently carry the sidecar or whose removal is unconfirmed
    #[serde(default)]
    pub resources: Vec<WorkloadRef>,
}

// =============================================================================
// Effective configuration
// =============================================================================

/// Snapshot of the settings a single pass converges workloads towards
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoggingScopeConfig {
    /// Sidecar image
    pub fluentd_image: String,
    /// Elasticsearch endpoint
    pub elastic_search_url: String,
    /// Credentials secret name
    pub secret_name: String,
    /// Namespace the credentials secret lives in
    pub secret_namespace: String,
}

impl LoggingScopeSpec {
    /// The Elasticsearch endpoint, built from host and port when no URL is set
    pub fn effective_url(&self) -> String {
        if !self.elastic_search_url.is_empty() || self.elastic_search_host.is_empty() {
            return self.elastic_search_url.clone();
        }
        format!(
            "http://{}:{}",
            self.elastic_search_host,
            self.elastic_search_port.unwrap_or(DEFAULT_ELASTICSEARCH_PORT)
        )
    }

    /// Freeze this spec into the configuration used for one pass
    pub fn config(&self, namespace: &str) -> LoggingScopeConfig {
        LoggingScopeConfig {
            fluentd_image: self.fluentd_image.clone(),
            elastic_search_url: self.effective_url(),
            secret_name: self.secret_name.clone(),
            secret_namespace: namespace.to_string(),
        }
    }
}
