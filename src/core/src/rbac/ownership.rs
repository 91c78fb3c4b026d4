//! Instance-level ownership checks for owned-scope grants.
//!
//! Ownership is decided by an [`OwnershipPredicate`] registered per resource
//! type. Resource types without one fall back to [`OwnerIdMatches`] unless
//! the validator is [strict](OwnershipValidator::strict).

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::models::{Decision, PolicyRule, ResourceInstance, Subject, WILDCARD};

/// Decides whether a subject owns a resource instance. Must be pure.
pub trait OwnershipPredicate: Send + Sync {
    fn is_owner(&self, subject: &dyn Subject, instance: &ResourceInstance) -> bool;
}

impl<F> OwnershipPredicate for F
where
    F: Fn(&dyn Subject, &ResourceInstance) -> bool + Send + Sync,
{
    fn is_owner(&self, subject: &dyn Subject, instance: &ResourceInstance) -> bool {
        self(subject, instance)
    }
}

/// The instance's `owner_id` equals the subject id.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerIdMatches;

impl OwnershipPredicate for OwnerIdMatches {
    fn is_owner(&self, subject: &dyn Subject, instance: &ResourceInstance) -> bool {
        instance.owner_id.as_ref() == Some(subject.id())
    }
}

/// An instance attribute holds the subject id, either directly or as an
/// element of an array (e.g. a `collaborators` list).
#[derive(Debug, Clone)]
pub struct AttributeMatches {
    attribute: String,
}

impl AttributeMatches {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl OwnershipPredicate for AttributeMatches {
    fn is_owner(&self, subject: &dyn Subject, instance: &ResourceInstance) -> bool {
        let id = subject.id().as_str();
        match instance.attributes.get(&self.attribute) {
            Some(Value::String(owner)) => owner == id,
            Some(Value::Array(owners)) => owners.iter().any(|v| v.as_str() == Some(id)),
            _ => false,
        }
    }
}

/// Resolves ownership for owned-scope rule matches.
#[derive(Clone)]
pub struct OwnershipValidator {
    predicates: HashMap<String, Arc<dyn OwnershipPredicate>>,
    fallback: Option<Arc<dyn OwnershipPredicate>>,
}

impl Default for OwnershipValidator {
    fn default() -> Self {
        Self {
            predicates: HashMap::new(),
            fallback: Some(Arc::new(OwnerIdMatches)),
        }
    }
}

impl fmt::Debug for OwnershipValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.predicates.keys().collect();
        types.sort();
        f.debug_struct("OwnershipValidator")
            .field("resource_types", &types)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl OwnershipValidator {
    /// Validator using [`OwnerIdMatches`] for every resource type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator that denies resource types without a registered predicate.
    pub fn strict() -> Self {
        Self {
            predicates: HashMap::new(),
            fallback: None,
        }
    }

    /// Use `predicate` for instances of `resource_type`.
    pub fn with_predicate<P>(mut self, resource_type: impl Into<String>, predicate: P) -> Self
    where
        P: OwnershipPredicate + 'static,
    {
        self.predicates.insert(resource_type.into(), Arc::new(predicate));
        self
    }

    /// Replace the predicate used for unregistered resource types.
    pub fn with_fallback<P>(mut self, predicate: P) -> Self
    where
        P: OwnershipPredicate + 'static,
    {
        self.fallback = Some(Arc::new(predicate));
        self
    }

    /// Decide an owned-scope match against a concrete instance.
    ///
    /// Returns `Allow` with `rule` when the subject owns the instance and
    /// `DenyNotOwner` otherwise, including when the instance is of a resource
    /// type the rule does not cover.
    pub fn check_ownership(
        &self,
        subject: &dyn Subject,
        instance: &ResourceInstance,
        rule: &Arc<PolicyRule>,
    ) -> Decision {
        let resource = rule.permission.resource.as_str();
        if resource != WILDCARD && resource != instance.resource_type {
            debug!(
                rule_resource = resource,
                instance_type = %instance.resource_type,
                "Instance type does not match rule"
            );
            return Decision::not_owner(Some(rule.clone()));
        }

        if self.is_owner(subject, instance) {
            Decision::allow(rule.clone())
        } else {
            Decision::not_owner(Some(rule.clone()))
        }
    }

    /// Whether `subject` owns `instance` under the predicate registered for
    /// its resource type, or the fallback.
    pub fn is_owner(&self, subject: &dyn Subject, instance: &ResourceInstance) -> bool {
        let predicate = self
            .predicates
            .get(&instance.resource_type)
            .or(self.fallback.as_ref());

        match predicate {
            Some(predicate) => predicate.is_owner(subject, instance),
            None => {
                debug!(resource_type = %instance.resource_type, "No ownership predicate registered");
                false
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
