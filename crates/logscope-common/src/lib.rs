//! Common types for the LoggingScope operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding operator-wide resources such as the cluster registration secret
pub const SYSTEM_NAMESPACE: &str = "verrazzano-system";

/// Secret written to a managed cluster when it registers with an admin cluster
pub const REGISTRATION_SECRET_NAME: &str = "verrazzano-cluster-registration";

/// Registration secret key holding the cluster name
pub const CLUSTER_NAME_KEY: &str = "cluster-name";

/// Registration secret key holding the Elasticsearch URL of the admin cluster
pub const ELASTICSEARCH_URL_KEY: &str = "es-url";

/// Logging secret key holding the Elasticsearch user name
pub const ELASTICSEARCH_USERNAME_KEY: &str = "username";

/// Logging secret key holding the Elasticsearch password
pub const ELASTICSEARCH_PASSWORD_KEY: &str = "password";

/// Field manager used for every write performed by the operator
pub const FIELD_MANAGER: &str = "logscope-controller";
