//! Role-based access control.
//!
//! This module provides:
//! - **Models**: subjects, roles, permissions, rules, bindings and decisions
//! - **Role Registry**: named roles, interned composites and cycle-checked membership
//! - **Policy Store**: pluggable async storage of rules and bindings
//! - **Matcher**: first-applicable rule selection with conditions and wildcards
//! - **Ownership**: per-resource-type ownership predicates for owned-scope grants
//! - **Enforcer**: cached authorization decisions and query filters
//! - **Predefined Roles**: Admin, Editor, Author, Viewer with default rule sets
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatekeeper_core::rbac::{Enforcer, Permission, Principal, ResourceInstance};
//!
//! let enforcer = Enforcer::in_memory();
//! let editor = enforcer.registry().register("editor")?;
//! let viewer = enforcer.registry().register("viewer")?;
//! enforcer.store().grant(&editor, Permission::owned("article", "update")).await?;
//! enforcer.store().grant(&viewer, Permission::any("article", "read")).await?;
//!
//! let both = enforcer.registry().compose(&[editor, viewer])?;
//! let alice = Principal::new("alice").with_role(both.id().clone());
//!
//! let article = ResourceInstance::new("article", "42").owned_by("alice");
//! assert!(enforcer.authorize(&alice, "update", "article", Some(&article)).await.is_allowed());
//! ```

pub mod conditions;
pub mod enforcer;
pub mod filter;
pub mod matcher;
pub mod models;
pub mod ownership;
pub mod registry;
pub mod roles;
pub mod store;

pub use conditions::{Attributes, Condition};
pub use enforcer::{AccessRequest, Enforcer};
pub use filter::{PredicateBuilder, QueryFilter};
pub use matcher::{MatchOutcome, Matcher, ResolvedRoles};
pub use models::{
    Decision, DecisionKind, Evaluation, Permission, PolicyRule, Principal, ResourceInstance, Role,
    RoleBinding, RoleId, RoleKind, Scope, Subject, SubjectId, WILDCARD,
};
pub use ownership::{AttributeMatches, OwnerIdMatches, OwnershipPredicate, OwnershipValidator};
pub use registry::RoleRegistry;
pub use roles::PredefinedRole;
pub use store::{InMemoryBackend, PolicyBackend, PolicyStore};
