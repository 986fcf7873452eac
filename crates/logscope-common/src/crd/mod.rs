//! Custom Resource Definitions for the LoggingScope operator
//!
//! Only the shapes the convergence engine reads and writes are modelled here.

mod logging_scope;
mod types;

pub use logging_scope::{LoggingScope, LoggingScopeConfig, LoggingScopeSpec, LoggingScopeStatus};
pub use types::{TypedReference, WorkloadRef};
