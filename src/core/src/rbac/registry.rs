//! Role registry: interning, composition and membership expansion.
//!
//! Roles are interned by identifier. A composite produced by [`RoleRegistry::compose`]
//! is interned by its normalized member set, so composing the same roles in
//! any order, with duplicates, or via nested composites returns the same
//! handle. Named roles can also be given members with
//! [`RoleRegistry::add_members`]; changes that would make a role contain
//! itself are rejected before anything is committed.
//!
//! Every successful mutation invalidates the attached decision cache.

use parking_lot::RwLock;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::models::{Role, RoleId, RoleKind, Subject};
use crate::cache::DecisionCache;
use crate::error::{Error, Result};

/// Separator used in composite role identifiers, e.g. `editor|viewer`.
pub const COMPOSITE_SEPARATOR: char = '|';

#[derive(Debug, Default)]
struct RegistryState {
    /// Every known role by id.
    roles: HashMap<RoleId, Role>,
    /// Direct members of a role (composite members or added members).
    members: HashMap<RoleId, BTreeSet<RoleId>>,
    /// Interned composites by normalized member set.
    composites: HashMap<BTreeSet<RoleId>, RoleId>,
}

impl RegistryState {
    /// Whether `role` is the handle this registry issued for its id.
    fn holds(&self, role: &Role) -> bool {
        self.roles.get(role.id()).is_some_and(|existing| existing.is_same(role))
    }
}

/// Process-wide registry of roles.
///
/// Thread-safe: reads share a `parking_lot::RwLock`, writes are serialized
/// by it. No lock is held outside a single method call.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    state: RwLock<RegistryState>,
    cache: Option<Arc<DecisionCache>>,
}

impl RoleRegistry {
    /// Create a registry without cache invalidation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that invalidates `cache` on every mutation.
    pub fn with_cache(cache: Arc<DecisionCache>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            cache: Some(cache),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a named role. Re-registering returns the existing handle.
    pub fn register(&self, name: impl Into<String>) -> Result<Role> {
        let name = name.into();
        validate_name(&name)?;
        let id = RoleId::new(name);

        if let Some(role) = self.state.read().roles.get(&id) {
            return Ok(role.clone());
        }

        let (role, created) = {
            let mut state = self.state.write();
            match state.roles.get(&id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let role = Role::new(id.clone(), RoleKind::Named);
                    state.roles.insert(id, role.clone());
                    (role, true)
                }
            }
        };

        if created {
            debug!(role = %role, "Registered role");
            self.invalidate();
        }
        Ok(role)
    }

    /// Compose roles into a single composite whose permissions are the union
    /// of its members'.
    ///
    /// Composites passed as members are flattened. A member set that reduces
    /// to one role returns that role itself.
    pub fn compose(&self, roles: &[Role]) -> Result<Role> {
        if roles.is_empty() {
            return Err(Error::invalid_composition("cannot compose an empty role set"));
        }

        let (role, created) = {
            let mut state = self.state.write();

            let mut normalized = BTreeSet::new();
            for role in roles {
                if !state.holds(role) {
                    return Err(Error::role_not_found(role.id()));
                }
                if role.is_composite() {
                    if let Some(members) = state.members.get(role.id()) {
                        normalized.extend(members.iter().cloned());
                    }
                } else {
                    normalized.insert(role.id().clone());
                }
            }

            if normalized.len() == 1 {
                let only = normalized.iter().next().and_then(|id| state.roles.get(id));
                match only {
                    Some(role) => (role.clone(), false),
                    None => return Err(Error::invalid_composition("member vanished during composition")),
                }
            } else if let Some(existing) = state
                .composites
                .get(&normalized)
                .and_then(|id| state.roles.get(id))
            {
                (existing.clone(), false)
            } else {
                let id = composite_id(&normalized);
                let role = Role::new(id.clone(), RoleKind::Composite);
                state.roles.insert(id.clone(), role.clone());
                state.members.insert(id.clone(), normalized.clone());
                state.composites.insert(normalized, id);
                (role, true)
            }
        };

        if created {
            info!(role = %role, "Composed role");
            self.invalidate();
        }
        Ok(role)
    }

    /// Make a named role contain further roles.
    ///
    /// Adding a role to itself is a no-op. Fails with a cycle error, leaving
    /// the registry unchanged, when a member already contains `role`.
    pub fn add_members(&self, role: &Role, members: &[Role]) -> Result<()> {
        let added = {
            let mut state = self.state.write();

            match state.roles.get(role.id()) {
                Some(existing) if existing.is_same(role) && existing.is_composite() => {
                    return Err(Error::invalid_composition(format!(
                        "composite role '{}' is immutable",
                        role
                    )));
                }
                Some(existing) if existing.is_same(role) => {}
                _ => return Err(Error::role_not_found(role.id())),
            }

            let current = state.members.get(role.id()).cloned().unwrap_or_default();
            let mut added = BTreeSet::new();
            for member in members {
                if !state.holds(member) {
                    return Err(Error::role_not_found(member.id()));
                }
                if member.id() == role.id() || current.contains(member.id()) {
                    continue;
                }
                added.insert(member.id().clone());
            }

            if added.is_empty() {
                return Ok(());
            }

            if would_cycle(&state.members, role.id(), &added) {
                warn!(role = %role, members = ?added, "Rejected cyclic role membership");
                return Err(Error::cycle_detected(format!(
                    "role '{}' would contain itself through {:?}",
                    role,
                    added.iter().map(RoleId::as_str).collect::<Vec<_>>()
                )));
            }

            state
                .members
                .entry(role.id().clone())
                .or_default()
                .extend(added.iter().cloned());
            added
        };

        info!(role = %role, members = ?added, "Added role members");
        self.invalidate();
        Ok(())
    }

    /// Remove members from a named role. Returns `true` if anything changed.
    pub fn remove_members(&self, role: &Role, members: &[Role]) -> Result<bool> {
        let changed = {
            let mut state = self.state.write();
            match state.roles.get(role.id()) {
                Some(existing) if existing.is_same(role) && existing.is_composite() => {
                    return Err(Error::invalid_composition(format!(
                        "composite role '{}' is immutable",
                        role
                    )));
                }
                Some(existing) if existing.is_same(role) => {}
                _ => return Err(Error::role_not_found(role.id())),
            }

            match state.members.get_mut(role.id()) {
                Some(current) => {
                    let before = current.len();
                    for member in members {
                        current.remove(member.id());
                    }
                    before != current.len()
                }
                None => false,
            }
        };

        if changed {
            info!(role = %role, "Removed role members");
            self.invalidate();
        }
        Ok(changed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &RoleId) -> Option<Role> {
        self.state.read().roles.get(id).cloned()
    }

    pub fn contains(&self, id: &RoleId) -> bool {
        self.state.read().roles.contains_key(id)
    }

    /// Whether `role` was issued by this registry, not merely an id it knows.
    pub fn owns(&self, role: &Role) -> bool {
        self.state.read().holds(role)
    }

    /// All roles, sorted by id.
    pub fn roles(&self) -> Vec<Role> {
        let state = self.state.read();
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.id().cmp(b.id()));
        roles
    }

    /// Direct members of a role.
    pub fn members(&self, role: &Role) -> BTreeSet<RoleId> {
        self.state
            .read()
            .members
            .get(role.id())
            .cloned()
            .unwrap_or_default()
    }

    /// Transitive closure of `roots` through membership.
    ///
    /// Unknown identifiers are dropped; they carry no permissions.
    pub fn expand<I>(&self, roots: I) -> BTreeSet<RoleId>
    where
        I: IntoIterator<Item = RoleId>,
    {
        let state = self.state.read();
        let mut effective = BTreeSet::new();
        let mut queue: VecDeque<RoleId> = VecDeque::new();

        for root in roots {
            if state.roles.contains_key(&root) {
                queue.push_back(root);
            } else {
                debug!(role = %root, "Ignoring unregistered role");
            }
        }

        while let Some(id) = queue.pop_front() {
            if !effective.insert(id.clone()) {
                continue;
            }
            if let Some(members) = state.members.get(&id) {
                queue.extend(members.iter().filter(|m| !effective.contains(*m)).cloned());
            }
        }

        effective
    }

    /// Expand a subject's assigned roles into its effective role set.
    pub fn resolve_effective_roles(&self, subject: &dyn Subject) -> BTreeSet<RoleId> {
        self.expand(subject.roles())
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_composition("role name must not be empty"));
    }
    if name.contains(COMPOSITE_SEPARATOR) {
        return Err(Error::invalid_composition(format!(
            "role name '{}' must not contain '{}'",
            name, COMPOSITE_SEPARATOR
        )));
    }
    Ok(())
}

fn composite_id(members: &BTreeSet<RoleId>) -> RoleId {
    let parts: Vec<&str> = members.iter().map(RoleId::as_str).collect();
    RoleId::new(parts.join(&COMPOSITE_SEPARATOR.to_string()))
}

/// Check whether adding `target -> added` edges to the membership graph
/// introduces a cycle.
fn would_cycle(
    members: &HashMap<RoleId, BTreeSet<RoleId>>,
    target: &RoleId,
    added: &BTreeSet<RoleId>,
) -> bool {
    let mut graph: DiGraph<&RoleId, ()> = DiGraph::new();
    let mut index: HashMap<&RoleId, NodeIndex> = HashMap::new();

    let edges = members
        .iter()
        .flat_map(|(parent, children)| children.iter().map(move |child| (parent, child)))
        .chain(added.iter().map(|child| (target, child)));

    for (parent, child) in edges {
        let from = *index.entry(parent).or_insert_with(|| graph.add_node(parent));
        let to = *index.entry(child).or_insert_with(|| graph.add_node(child));
        graph.add_edge(from, to, ());
    }

    is_cyclic_directed(&graph)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
