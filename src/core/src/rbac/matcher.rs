//! Rule matching: which grant, if any, covers a request.
//!
//! The matcher resolves a subject's effective roles, loads their rules and
//! picks the first applicable one. Roles are visited in sorted id order and
//! rules in insertion order; an any-scope match always beats an owned-scope
//! match. An owned-scope match cannot be decided without the concrete
//! instance and is returned as [`Evaluation::PendingOwnership`].
//!
//! Roles granted through expiring bindings bound how long an outcome stays
//! valid; [`MatchOutcome::valid_until`] carries the earliest such expiry.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::conditions::Attributes;
use super::models::{
    Decision, DecisionKind, Evaluation, Permission, PolicyRule, RoleId, Scope, Subject, SubjectId,
};
use super::registry::RoleRegistry;
use super::store::PolicyStore;
use crate::error::Result;

/// Result of a matcher run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub evaluation: Evaluation,
    /// `false` when the outcome depended on request attributes.
    pub cacheable: bool,
    /// Earliest expiry among the bindings the outcome relied on.
    pub valid_until: Option<DateTime<Utc>>,
}

/// Effective roles of a subject at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRoles {
    pub roles: BTreeSet<RoleId>,
    /// Earliest expiry among the active bindings that contributed roots.
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Matcher {
    registry: Arc<RoleRegistry>,
    store: PolicyStore,
}

impl Matcher {
    pub fn new(registry: Arc<RoleRegistry>, store: PolicyStore) -> Self {
        Self { registry, store }
    }

    /// Direct assignments plus active bindings, expanded through membership.
    pub async fn effective_roles(&self, subject: &dyn Subject) -> Result<BTreeSet<RoleId>> {
        Ok(self.resolve(subject.id(), subject.roles()).await?.roles)
    }

    /// Expand already snapshotted assignments plus the subject's active
    /// bindings.
    pub async fn resolve(&self, subject: &SubjectId, assigned: Vec<RoleId>) -> Result<ResolvedRoles> {
        let bindings = self.store.bindings_for(subject).await?;
        let valid_until = bindings.iter().filter_map(|b| b.expires_at).min();

        let mut roots = assigned;
        roots.extend(bindings.into_iter().map(|b| b.role_id));
        Ok(ResolvedRoles {
            roles: self.registry.expand(roots),
            valid_until,
        })
    }

    /// Evaluate a request against the stored rules.
    ///
    /// Reads the subject's assigned roles once.
    pub async fn evaluate(
        &self,
        subject: &dyn Subject,
        action: &str,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<MatchOutcome> {
        self.evaluate_roles(subject.id(), subject.roles(), action, resource_type, attributes)
            .await
    }

    /// Evaluate a request for a subject whose assigned roles were already read.
    #[instrument(skip(self, assigned, attributes), fields(subject = %subject))]
    pub async fn evaluate_roles(
        &self,
        subject: &SubjectId,
        assigned: Vec<RoleId>,
        action: &str,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<MatchOutcome> {
        let ResolvedRoles { roles, valid_until } = self.resolve(subject, assigned).await?;
        if roles.is_empty() {
            debug!("Subject has no effective roles");
            return Ok(MatchOutcome {
                evaluation: Evaluation::Final(Decision::deny(DecisionKind::DenyNoRole)),
                cacheable: true,
                valid_until,
            });
        }

        let rules = self.store.rules_for(&roles).await?;
        let candidates: Vec<&Arc<PolicyRule>> = rules
            .iter()
            .filter(|rule| rule.covers(resource_type, action))
            .collect();
        let cacheable = !candidates.iter().any(|rule| rule.is_conditional());

        let applicable: Vec<&Arc<PolicyRule>> = candidates
            .into_iter()
            .filter(|rule| rule.applies_to(resource_type, action, attributes))
            .collect();

        let evaluation = if let Some(rule) = first_with_scope(&applicable, Scope::Any) {
            debug!(rule = %rule.id, role = %rule.role, "Matched any-scope rule");
            Evaluation::Final(Decision::allow(rule.clone()))
        } else if let Some(rule) = first_with_scope(&applicable, Scope::Owned) {
            debug!(rule = %rule.id, role = %rule.role, "Matched owned-scope rule");
            Evaluation::PendingOwnership(rule.clone())
        } else {
            debug!(roles = roles.len(), "No rule matched");
            Evaluation::Final(Decision::deny(DecisionKind::DenyNoPermission))
        };

        Ok(MatchOutcome {
            evaluation,
            cacheable,
            valid_until,
        })
    }

    /// Union of the permissions granted by a subject's effective roles.
    pub async fn effective_permissions(&self, subject: &dyn Subject) -> Result<BTreeSet<Permission>> {
        let roles = self.effective_roles(subject).await?;
        let rules = self.store.rules_for(&roles).await?;
        Ok(rules.iter().map(|rule| rule.permission.clone()).collect())
    }
}

fn first_with_scope<'a>(rules: &[&'a Arc<PolicyRule>], scope: Scope) -> Option<&'a Arc<PolicyRule>> {
    rules.iter().copied().find(|rule| rule.scope() == scope)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
