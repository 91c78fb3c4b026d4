//! RBAC data models: identifiers, roles, permissions, rules, bindings,
//! resource instances and decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

use super::conditions::{self, Attributes, Condition};

/// Matches any resource type or action when used in a permission.
pub const WILDCARD: &str = "*";

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed subject identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strongly-typed role identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// How a role came to exist in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Registered by name. May be given members later.
    Named,
    /// Produced by composing two or more roles. Immutable.
    Composite,
}

#[derive(Debug)]
struct RoleData {
    id: RoleId,
    kind: RoleKind,
}

/// Interned role handle issued by the role registry.
///
/// Handles for the same identifier share one allocation, so [`Role::is_same`]
/// (pointer identity) holds for any two handles the registry returned for
/// the same name or member set.
#[derive(Debug, Clone)]
pub struct Role(Arc<RoleData>);

impl Role {
    pub(crate) fn new(id: RoleId, kind: RoleKind) -> Self {
        Self(Arc::new(RoleData { id, kind }))
    }

    pub fn id(&self) -> &RoleId {
        &self.0.id
    }

    pub fn kind(&self) -> RoleKind {
        self.0.kind
    }

    pub fn is_composite(&self) -> bool {
        self.0.kind == RoleKind::Composite
    }

    /// Referential identity: both handles point at the same interned role.
    pub fn is_same(&self, other: &Role) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other) || self.0.id == other.0.id
    }
}

impl Eq for Role {}

impl Hash for Role {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// How far a permission reaches once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Granted unconditionally once matched.
    Any,
    /// Granted only for resource instances the subject owns.
    Owned,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Owned => "owned",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant of an action on a resource type, at a scope.
///
/// Permissions render as `resource:action:scope`, for example:
/// - `article:read:any`
/// - `article:edit:owned`
/// - `*:*:any`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    /// The resource type (e.g., "article", "comment"), or `*`.
    pub resource: String,
    /// The action (e.g., "read", "edit"), or `*`.
    pub action: String,
    /// Whether an ownership check is required.
    pub scope: Scope,
}

impl Permission {
    /// Create a new permission.
    pub fn new(resource: impl Into<String>, action: impl Into<String>, scope: Scope) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            scope,
        }
    }

    /// Permission granted regardless of ownership.
    pub fn any(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(resource, action, Scope::Any)
    }

    /// Permission granted only on owned instances.
    pub fn owned(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(resource, action, Scope::Owned)
    }

    /// Parse `"resource:action"` (scope any) or `"resource:action:scope"`.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let scope = match parts.get(2) {
            None => Scope::Any,
            Some(&"any") => Scope::Any,
            Some(&"owned") => Scope::Owned,
            Some(_) => return None,
        };
        match parts.as_slice() {
            [resource, action] | [resource, action, _]
                if !resource.is_empty() && !action.is_empty() =>
            {
                Some(Self::new(*resource, *action, scope))
            }
            _ => None,
        }
    }

    /// Return the canonical string form `"resource:action:scope"`.
    pub fn as_string(&self) -> String {
        format!("{}:{}:{}", self.resource, self.action, self.scope)
    }

    /// Check whether this grant covers a requested (resource type, action).
    ///
    /// A wildcard `"*"` in the grant matches anything. Requests are literal.
    pub fn matches(&self, resource_type: &str, action: &str) -> bool {
        let resource_match = self.resource == WILDCARD || self.resource == resource_type;
        let action_match = self.action == WILDCARD || self.action == action;
        resource_match && action_match
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.scope)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Rule
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored association of a role with a permission and optional conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Audit identifier.
    pub id: Uuid,
    /// The role receiving the grant.
    pub role: RoleId,
    /// The grant.
    pub permission: Permission,
    /// Predicates on request attributes; all must hold for the rule to match.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// When the rule was stored.
    pub created_at: DateTime<Utc>,
}

impl PolicyRule {
    pub fn new(role: RoleId, permission: Permission) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            permission,
            conditions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn is_conditional(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Whether the rule's permission covers the requested pair, ignoring conditions.
    pub fn covers(&self, resource_type: &str, action: &str) -> bool {
        self.permission.matches(resource_type, action)
    }

    /// Whether the rule applies to the request, conditions included.
    pub fn applies_to(&self, resource_type: &str, action: &str, attributes: &Attributes) -> bool {
        self.covers(resource_type, action) && conditions::all_satisfied(&self.conditions, attributes)
    }

    pub fn scope(&self) -> Scope {
        self.permission.scope
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Binding
// ═══════════════════════════════════════════════════════════════════════════════

/// Binds a subject to a role in the policy store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBinding {
    /// The subject this binding applies to.
    pub subject_id: SubjectId,
    /// The role being assigned.
    pub role_id: RoleId,
    /// When the binding was created.
    pub created_at: DateTime<Utc>,
    /// When the binding expires (None = never).
    pub expires_at: Option<DateTime<Utc>>,
    /// Who granted this binding.
    pub granted_by: Option<SubjectId>,
}

impl RoleBinding {
    pub fn new(subject_id: SubjectId, role_id: RoleId) -> Self {
        Self {
            subject_id,
            role_id,
            created_at: Utc::now(),
            expires_at: None,
            granted_by: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn granted_by(mut self, subject_id: SubjectId) -> Self {
        self.granted_by = Some(subject_id);
        self
    }

    /// Check if this binding is currently active (not expired).
    pub fn is_active(&self) -> bool {
        self.expires_at.map_or(true, |exp| Utc::now() < exp)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subject
// ═══════════════════════════════════════════════════════════════════════════════

/// The minimal capability the engine needs from an authenticated principal.
///
/// Any user representation can implement this; the engine reads the role
/// assignments once per evaluation.
pub trait Subject: Send + Sync {
    /// Stable identifier for the lifetime of a request.
    fn id(&self) -> &SubjectId;

    /// Roles assigned directly to this subject.
    fn roles(&self) -> Vec<RoleId>;
}

/// Plain subject carrying an identifier and its assigned roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: SubjectId,
    pub roles: BTreeSet<RoleId>,
}

impl Principal {
    pub fn new(id: impl Into<SubjectId>) -> Self {
        Self {
            id: id.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<RoleId>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleId>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }
}

impl Subject for Principal {
    fn id(&self) -> &SubjectId {
        &self.id
    }

    fn roles(&self) -> Vec<RoleId> {
        self.roles.iter().cloned().collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Instance
// ═══════════════════════════════════════════════════════════════════════════════

/// A concrete resource an owned-scope permission is checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// Resource type, e.g. "article".
    pub resource_type: String,
    /// Instance identifier.
    pub id: String,
    /// Owning subject, when the resource has a single owner.
    pub owner_id: Option<SubjectId>,
    /// Free-form attributes for custom ownership predicates.
    #[serde(default)]
    pub attributes: Attributes,
}

impl ResourceInstance {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            owner_id: None,
            attributes: Attributes::new(),
        }
    }

    pub fn owned_by(mut self, owner: impl Into<SubjectId>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome taxonomy. Deny reasons exist for audit logs; callers should treat
/// every deny identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Allow,
    /// The subject has no effective roles.
    DenyNoRole,
    /// Roles exist but none grants a matching permission.
    DenyNoPermission,
    /// Ownership check failed or could not be performed.
    DenyNotOwner,
    /// The policy store failed; denied to fail closed.
    DenyUnavailable,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::DenyNoRole => "deny_no_role",
            Self::DenyNoPermission => "deny_no_permission",
            Self::DenyNotOwner => "deny_not_owner",
            Self::DenyUnavailable => "deny_unavailable",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an authorization, carrying the matched rule for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    kind: DecisionKind,
    rule: Option<Arc<PolicyRule>>,
}

impl Decision {
    pub fn allow(rule: Arc<PolicyRule>) -> Self {
        Self {
            kind: DecisionKind::Allow,
            rule: Some(rule),
        }
    }

    pub fn deny(kind: DecisionKind) -> Self {
        debug_assert!(kind != DecisionKind::Allow);
        Self { kind, rule: None }
    }

    /// Ownership denial, keeping the owned-scope rule that required the check.
    pub fn not_owner(rule: Option<Arc<PolicyRule>>) -> Self {
        Self {
            kind: DecisionKind::DenyNotOwner,
            rule,
        }
    }

    pub fn kind(&self) -> DecisionKind {
        self.kind
    }

    pub fn matched_rule(&self) -> Option<&Arc<PolicyRule>> {
        self.rule.as_ref()
    }

    pub fn is_allowed(&self) -> bool {
        self.kind == DecisionKind::Allow
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }
}

/// What the matcher concluded before any instance-level check.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// A decision that needs no further input.
    Final(Decision),
    /// An owned-scope rule matched; the concrete instance decides.
    PendingOwnership(Arc<PolicyRule>),
}

impl Evaluation {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
