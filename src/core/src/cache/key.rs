//! Decision cache keys.
//!
//! A key identifies one (subject, action, resource type) evaluation. It never
//! includes the resource instance, since instance-level checks are not cached.
//! The subject's directly assigned roles are folded into a fingerprint so a
//! refreshed role assignment between requests cannot reuse a stale entry.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::rbac::models::{RoleId, Subject, SubjectId};

/// Key for a memoized evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    subject: SubjectId,
    action: String,
    resource_type: String,
    roles_fingerprint: u64,
}

impl DecisionKey {
    /// Build a key from a subject, reading its assigned roles once.
    pub fn for_subject(subject: &dyn Subject, action: &str, resource_type: &str) -> Self {
        Self::new(subject.id().clone(), action, resource_type, &subject.roles())
    }

    pub fn new(
        subject: SubjectId,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        roles: &[RoleId],
    ) -> Self {
        Self {
            subject,
            action: action.into(),
            resource_type: resource_type.into(),
            roles_fingerprint: roles_fingerprint(roles),
        }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}#{:016x}",
            self.subject, self.action, self.resource_type, self.roles_fingerprint
        )
    }
}

/// Order- and duplicate-insensitive hash of a role assignment.
pub fn roles_fingerprint(roles: &[RoleId]) -> u64 {
    let normalized: BTreeSet<&RoleId> = roles.iter().collect();
    let mut hasher = DefaultHasher::new();
    for role in normalized {
        role.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::Principal;

    #[test]
    fn test_fingerprint_ignores_order_and_duplicates() {
        let a = roles_fingerprint(&[RoleId::new("editor"), RoleId::new("viewer")]);
        let b = roles_fingerprint(&[
            RoleId::new("viewer"),
            RoleId::new("editor"),
            RoleId::new("viewer"),
        ]);
        assert_eq!(a, b);
        assert_ne!(a, roles_fingerprint(&[RoleId::new("viewer")]));
    }

    #[test]
    fn test_key_changes_with_role_assignment() {
        let before = Principal::new("alice").with_role("viewer");
        let after = Principal::new("alice").with_roles(["viewer", "editor"]);

        let k1 = DecisionKey::for_subject(&before, "read", "article");
        let k2 = DecisionKey::for_subject(&after, "read", "article");
        assert_ne!(k1, k2);
        assert_eq!(k1.subject(), k2.subject());
    }

    #[test]
    fn test_key_display() {
        let key = DecisionKey::new(SubjectId::new("alice"), "read", "article", &[]);
        assert!(key.to_string().starts_with("alice:read:article#"));
        assert_eq!(key.action(), "read");
        assert_eq!(key.resource_type(), "article");
    }
}
