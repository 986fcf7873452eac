//! Reference types shared by the LoggingScope spec and status

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A reference to a workload object as declared on a scope
///
/// The namespace is implied by the referencing scope.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    /// API version of the referent (e.g. `apps/v1`)
    pub api_version: String,
    /// Kind of the referent
    pub kind: String,
    /// Name of the referent
    pub name: String,
}

/// Identity of a workload associated with a scope
///
/// This is what the scope status records. Two refs are the same association
/// only if every field matches.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    /// API version of the workload
    pub api_version: String,
    /// Kind of the workload
    pub kind: String,
    /// Name of the workload
    pub name: String,
    /// Namespace of the workload
    pub namespace: String,
    /// Relation of the workload to its owner, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
}

impl WorkloadRef {
    /// Build a ref from a scope's declared reference
    pub fn from_reference(reference: &TypedReference, namespace: impl Into<String>) -> Self {
        Self {
            api_version: reference.api_version.clone(),
            kind: reference.kind.clone(),
            name: reference.name.clone(),
            namespace: namespace.into(),
            role: String::new(),
        }
    }

    /// Dispatch key in `apiVersion/kind` form
    pub fn handler_key(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }

    /// API group of the workload; the core group is the empty string
    pub fn group(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// API version without the group (e.g. `v1` for `apps/v1`)
    pub fn version(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((_, version)) => version,
            None => &self.api_version,
        }
    }
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
