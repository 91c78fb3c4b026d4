#![allow(clippy::result_large_err)]
//! # Gatekeeper Core
//!
//! Role-based access control decision engine.
//!
//! ## Architecture
//!
//! - **Role Registry**: Named and composite roles with cycle-checked membership
//! - **Policy Store**: Role → permission rules behind a pluggable async backend
//! - **Matcher**: Finds the first applicable rule for a request
//! - **Ownership**: Decides owned-scope grants against concrete instances
//! - **Decision Cache**: TTL cache of evaluations with bulk invalidation
//! - **Enforcer**: Single entry point combining all of the above
//! - **Telemetry**: Structured logging and decision metrics

pub mod cache;
pub mod config;
pub mod error;
pub mod rbac;
pub mod telemetry;

pub use error::{Error, ErrorCode, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStats, DecisionCache, DecisionKey};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCode, ErrorSeverity, Result};
    pub use crate::rbac::{
        AccessRequest, Attributes, Condition, Decision, DecisionKind, Enforcer, Evaluation,
        InMemoryBackend, OwnershipPredicate, OwnershipValidator, Permission, PolicyBackend,
        PolicyRule, PolicyStore, PredefinedRole, PredicateBuilder, Principal, QueryFilter,
        ResourceInstance, Role, RoleBinding, RoleId, RoleRegistry, Scope, Subject, SubjectId,
    };
    pub use crate::telemetry::{init_logging, LogFormat, LoggingConfig};
}
