//! Query filters for listing endpoints.
//!
//! A [`QueryFilter`] describes which instances of a resource type a subject
//! may see for an action, without enumerating them. Applications translate
//! it into their own query language through a [`PredicateBuilder`].
//!
//! [`QueryFilter::OwnedBy`] is expressed in terms of the instance owner id.
//! Resource types whose ownership is decided by a custom
//! [`OwnershipPredicate`](super::ownership::OwnershipPredicate) cannot be
//! pushed into a query that way; check loaded instances with
//! [`QueryFilter::permits_with`] instead.

use serde::{Deserialize, Serialize};

use super::models::{Evaluation, ResourceInstance, Subject, SubjectId};
use super::ownership::OwnershipValidator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "subject", rename_all = "snake_case")]
pub enum QueryFilter {
    /// Every instance is visible.
    All,
    /// Only instances owned by this subject.
    OwnedBy(SubjectId),
    /// No instance is visible.
    Nothing,
}

impl QueryFilter {
    /// Derive a filter from a matcher evaluation.
    pub fn from_evaluation(evaluation: &Evaluation, subject: &SubjectId) -> Self {
        match evaluation {
            Evaluation::Final(decision) if decision.is_allowed() => Self::All,
            Evaluation::Final(_) => Self::Nothing,
            Evaluation::PendingOwnership(_) => Self::OwnedBy(subject.clone()),
        }
    }

    /// Check an already loaded instance against the filter, comparing
    /// `owner_id` only.
    pub fn permits(&self, instance: &ResourceInstance) -> bool {
        match self {
            Self::All => true,
            Self::OwnedBy(subject) => instance.owner_id.as_ref() == Some(subject),
            Self::Nothing => false,
        }
    }

    /// Check an already loaded instance, deciding ownership the same way
    /// authorization does.
    pub fn permits_with(
        &self,
        subject: &dyn Subject,
        instance: &ResourceInstance,
        ownership: &OwnershipValidator,
    ) -> bool {
        match self {
            Self::All => true,
            Self::OwnedBy(owner) => owner == subject.id() && ownership.is_owner(subject, instance),
            Self::Nothing => false,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Translate into an application-defined predicate.
    pub fn build<B: PredicateBuilder>(&self, builder: &B) -> B::Predicate {
        match self {
            Self::All => builder.all(),
            Self::OwnedBy(subject) => builder.owned_by(subject),
            Self::Nothing => builder.nothing(),
        }
    }
}

/// Maps filter outcomes onto a query predicate type (SQL fragment, ORM
/// expression, search query, ...).
pub trait PredicateBuilder {
    type Predicate;

    fn all(&self) -> Self::Predicate;

    fn owned_by(&self, subject: &SubjectId) -> Self::Predicate;

    fn nothing(&self) -> Self::Predicate;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
