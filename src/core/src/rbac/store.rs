//! Policy store: role → permission rules and subject → role bindings.
//!
//! [`PolicyBackend`] is the storage contract. It is async and may be slow or
//! remote; [`InMemoryBackend`] is the default implementation. [`PolicyStore`]
//! is the facade the rest of the engine talks to: it validates roles against
//! the [`RoleRegistry`], expands inherited permissions and invalidates the
//! decision cache after every mutation.

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::conditions::Condition;
use super::models::{Permission, PolicyRule, Role, RoleBinding, RoleId, SubjectId};
use super::registry::RoleRegistry;
use crate::cache::DecisionCache;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Backend contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage for policy rules and role bindings.
///
/// Each mutation must be atomic with respect to concurrent readers: a reader
/// observes either the state before or after it, never a mix.
#[async_trait]
pub trait PolicyBackend: Send + Sync + fmt::Debug {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Store a rule. Fails with [`Error::AlreadyExists`] when the role already
    /// holds the same permission.
    async fn add_policy(&self, rule: PolicyRule) -> Result<Arc<PolicyRule>>;

    /// Remove the rule for a role and permission. Fails with [`Error::NotFound`].
    async fn remove_policy(&self, role: &RoleId, permission: &Permission) -> Result<Arc<PolicyRule>>;

    /// Rules attached directly to `role`, in insertion order.
    async fn list_rules(&self, role: &RoleId) -> Result<Vec<Arc<PolicyRule>>>;

    /// Roles holding at least one rule.
    async fn list_roles(&self) -> Result<BTreeSet<RoleId>>;

    /// Store a binding, replacing any binding of the same subject and role.
    async fn add_binding(&self, binding: RoleBinding) -> Result<()>;

    /// Remove a binding. Returns `true` if one existed.
    async fn remove_binding(&self, subject: &SubjectId, role: &RoleId) -> Result<bool>;

    /// Every stored binding of a subject, expired ones included.
    async fn list_bindings(&self, subject: &SubjectId) -> Result<Vec<RoleBinding>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct InMemoryState {
    rules: HashMap<RoleId, Vec<Arc<PolicyRule>>>,
    bindings: HashMap<SubjectId, Vec<RoleBinding>>,
}

/// Backend keeping everything in process memory behind one readers-writer lock.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<InMemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored rules.
    pub fn rule_count(&self) -> usize {
        self.state.read().rules.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl PolicyBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn add_policy(&self, rule: PolicyRule) -> Result<Arc<PolicyRule>> {
        let mut state = self.state.write();
        let rules = state.rules.entry(rule.role.clone()).or_default();
        if rules.iter().any(|r| r.permission == rule.permission) {
            return Err(Error::already_exists(&rule.role, &rule.permission));
        }
        let rule = Arc::new(rule);
        rules.push(rule.clone());
        Ok(rule)
    }

    async fn remove_policy(&self, role: &RoleId, permission: &Permission) -> Result<Arc<PolicyRule>> {
        let mut state = self.state.write();
        let rules = state
            .rules
            .get_mut(role)
            .ok_or_else(|| Error::not_found(role, permission))?;
        let index = rules
            .iter()
            .position(|r| &r.permission == permission)
            .ok_or_else(|| Error::not_found(role, permission))?;
        let removed = rules.remove(index);
        if rules.is_empty() {
            state.rules.remove(role);
        }
        Ok(removed)
    }

    async fn list_rules(&self, role: &RoleId) -> Result<Vec<Arc<PolicyRule>>> {
        Ok(self.state.read().rules.get(role).cloned().unwrap_or_default())
    }

    async fn list_roles(&self) -> Result<BTreeSet<RoleId>> {
        Ok(self.state.read().rules.keys().cloned().collect())
    }

    async fn add_binding(&self, binding: RoleBinding) -> Result<()> {
        let mut state = self.state.write();
        let bindings = state.bindings.entry(binding.subject_id.clone()).or_default();
        bindings.retain(|b| b.role_id != binding.role_id);
        bindings.push(binding);
        Ok(())
    }

    async fn remove_binding(&self, subject: &SubjectId, role: &RoleId) -> Result<bool> {
        let mut state = self.state.write();
        let Some(bindings) = state.bindings.get_mut(subject) else {
            return Ok(false);
        };
        let before = bindings.len();
        bindings.retain(|b| &b.role_id != role);
        let removed = bindings.len() != before;
        if bindings.is_empty() {
            state.bindings.remove(subject);
        }
        Ok(removed)
    }

    async fn list_bindings(&self, subject: &SubjectId) -> Result<Vec<RoleBinding>> {
        Ok(self.state.read().bindings.get(subject).cloned().unwrap_or_default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Facade over a [`PolicyBackend`].
#[derive(Debug, Clone)]
pub struct PolicyStore {
    backend: Arc<dyn PolicyBackend>,
    registry: Arc<RoleRegistry>,
    cache: Option<Arc<DecisionCache>>,
}

impl PolicyStore {
    pub fn new(backend: Arc<dyn PolicyBackend>, registry: Arc<RoleRegistry>) -> Self {
        Self {
            backend,
            registry,
            cache: None,
        }
    }

    /// Invalidate `cache` after every mutation.
    pub fn with_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rules
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `permission` to `role`, optionally guarded by conditions.
    pub async fn add_policy(
        &self,
        role: &Role,
        permission: Permission,
        conditions: Vec<Condition>,
    ) -> Result<Arc<PolicyRule>> {
        self.ensure_owned(role)?;
        let rule = PolicyRule::new(role.id().clone(), permission).with_conditions(conditions);
        let stored = self.backend.add_policy(rule).await?;

        info!(
            role = %stored.role,
            permission = %stored.permission,
            conditional = stored.is_conditional(),
            "Added policy"
        );
        self.invalidate();
        Ok(stored)
    }

    /// Unconditional [`add_policy`](Self::add_policy).
    pub async fn grant(&self, role: &Role, permission: Permission) -> Result<Arc<PolicyRule>> {
        self.add_policy(role, permission, Vec::new()).await
    }

    pub async fn remove_policy(&self, role: &Role, permission: &Permission) -> Result<Arc<PolicyRule>> {
        self.ensure_owned(role)?;
        let removed = self.backend.remove_policy(role.id(), permission).await?;
        info!(role = %removed.role, permission = %removed.permission, "Removed policy");
        self.invalidate();
        Ok(removed)
    }

    /// Rules attached directly to a role.
    pub async fn list_rules(&self, role: &RoleId) -> Result<Vec<Arc<PolicyRule>>> {
        self.backend.list_rules(role).await
    }

    /// Permissions of a role, including those inherited through membership.
    pub async fn list_permissions(&self, role: &Role) -> Result<BTreeSet<Permission>> {
        let effective = self.registry.expand([role.id().clone()]);
        let rules = self.rules_for(&effective).await?;
        Ok(rules.into_iter().map(|r| r.permission.clone()).collect())
    }

    /// Roles holding at least one rule.
    pub async fn list_roles(&self) -> Result<BTreeSet<RoleId>> {
        self.backend.list_roles().await
    }

    /// Rules of every role in `roles`, in role order then insertion order.
    ///
    /// Backend calls run concurrently.
    pub async fn rules_for(&self, roles: &BTreeSet<RoleId>) -> Result<Vec<Arc<PolicyRule>>> {
        let lists = try_join_all(roles.iter().map(|role| self.backend.list_rules(role))).await?;
        Ok(lists.into_iter().flatten().collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bindings
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind a subject to a role. Already-expired bindings are ignored.
    pub async fn assign_role(&self, binding: RoleBinding) -> Result<()> {
        self.ensure_registered(&binding.role_id)?;
        if !binding.is_active() {
            debug!(
                subject = %binding.subject_id,
                role = %binding.role_id,
                "Skipping expired binding"
            );
            return Ok(());
        }

        let (subject, role) = (binding.subject_id.clone(), binding.role_id.clone());
        self.backend.add_binding(binding).await?;
        info!(subject = %subject, role = %role, "Assigned role");
        self.invalidate();
        Ok(())
    }

    /// Remove a subject's binding to a role. Returns `true` if one existed.
    pub async fn unassign_role(&self, subject: &SubjectId, role: &RoleId) -> Result<bool> {
        let removed = self.backend.remove_binding(subject, role).await?;
        if removed {
            info!(subject = %subject, role = %role, "Unassigned role");
            self.invalidate();
        }
        Ok(removed)
    }

    /// Active bindings of a subject.
    pub async fn bindings_for(&self, subject: &SubjectId) -> Result<Vec<RoleBinding>> {
        let mut bindings = self.backend.list_bindings(subject).await?;
        bindings.retain(RoleBinding::is_active);
        Ok(bindings)
    }

    /// Roles a subject holds through active bindings.
    pub async fn active_roles(&self, subject: &SubjectId) -> Result<Vec<RoleId>> {
        Ok(self
            .bindings_for(subject)
            .await?
            .into_iter()
            .map(|b| b.role_id)
            .collect())
    }

    fn ensure_owned(&self, role: &Role) -> Result<()> {
        if self.registry.owns(role) {
            Ok(())
        } else {
            Err(Error::role_not_found(role.id()))
        }
    }

    fn ensure_registered(&self, role: &RoleId) -> Result<()> {
        if self.registry.contains(role) {
            Ok(())
        } else {
            Err(Error::role_not_found(role))
        }
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
