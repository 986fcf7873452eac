//! Environment configuration for the operator
//!
//! Provides trait-based access to environment configuration,
//! enabling dependency injection and mocking for tests.

/// Environment variable naming the default log collector image
pub const DEFAULT_FLUENTD_IMAGE_ENV: &str = "DEFAULT_FLUENTD_IMAGE";

/// Environment variable overriding the default Elasticsearch URL
pub const DEFAULT_ELASTICSEARCH_URL_ENV: &str = "DEFAULT_ELASTICSEARCH_URL";

/// Environment variable overriding the default credentials secret name
pub const DEFAULT_LOGGING_SECRET_ENV: &str = "DEFAULT_LOGGING_SECRET";

/// Elasticsearch endpoint used when a scope names none
pub const DEFAULT_ELASTICSEARCH_URL: &str = "http://verrazzano-authproxy-elasticsearch:8775";

/// Credentials secret used when a scope names none
pub const DEFAULT_SECRET_NAME: &str = "verrazzano-es-internal";

/// Trait for reading operator environment configuration
///
/// This abstracts reading from environment variables, enabling
/// proper unit testing without manipulating global state.
#[cfg_attr(test, mockall::automock)]
pub trait OperatorEnv: Send + Sync {
    /// Look up a single environment variable
    fn var(&self, name: &str) -> Option<String>;
}

/// Default implementation that reads from process environment variables
#[derive(Clone, Debug, Default)]
pub struct OsEnv;

impl OperatorEnv for OsEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Values filled into a scope's empty fields before a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeDefaults {
    /// Default log collector image; empty when the environment names none
    pub fluentd_image: String,
    /// Default Elasticsearch endpoint
    pub elastic_search_url: String,
    /// Default credentials secret name
    pub secret_name: String,
}

impl ScopeDefaults {
    /// Read defaults from the environment, falling back to built-in values
    pub fn from_env(env: &dyn OperatorEnv) -> Self {
        Self {
            fluentd_image: env.var(DEFAULT_FLUENTD_IMAGE_ENV).unwrap_or_default(),
            elastic_search_url: env
                .var(DEFAULT_ELASTICSEARCH_URL_ENV)
                .unwrap_or_else(|| DEFAULT_ELASTICSEARCH_URL.to_string()),
            secret_name: env
                .var(DEFAULT_LOGGING_SECRET_ENV)
                .unwrap_or_else(|| DEFAULT_SECRET_NAME.to_string()),
        }
    }

    /// Whether scopes that name no image can still be reconciled
    pub fn has_fluentd_image(&self) -> bool {
        !self.fluentd_image.is_empty()
    }
}

impl Default for ScopeDefaults {
    fn default() -> Self {
        Self::from_env(&OsEnv)
    }
}
