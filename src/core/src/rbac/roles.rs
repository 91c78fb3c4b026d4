//! Predefined roles with default rule sets.
//!
//! | Role    | Contains | Grants                                          |
//! |---------|----------|-------------------------------------------------|
//! | Admin   |          | `*:*:any`                                       |
//! | Editor  | Author   | `*:update:any`, `*:delete:any`                  |
//! | Author  | Viewer   | `*:create:any`, `*:update:owned`, `*:delete:owned` |
//! | Viewer  |          | `*:read:any`                                    |

use tracing::info;

use super::models::{Permission, Role, WILDCARD};
use super::store::PolicyStore;
use crate::error::{Error, Result};

/// Predefined role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedRole {
    Admin,
    Editor,
    Author,
    Viewer,
}

impl PredefinedRole {
    /// Get the role identifier string.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Author => "author",
            Self::Viewer => "viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Full access to every resource",
            Self::Editor => "Modify and delete any resource",
            Self::Author => "Create resources and manage their own",
            Self::Viewer => "Read-only access to every resource",
        }
    }

    /// Roles this role contains.
    pub fn members(&self) -> &'static [PredefinedRole] {
        match self {
            Self::Admin | Self::Viewer => &[],
            Self::Editor => &[Self::Author],
            Self::Author => &[Self::Viewer],
        }
    }

    /// Rules attached directly to this role.
    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            Self::Admin => vec![Permission::any(WILDCARD, WILDCARD)],
            Self::Editor => vec![
                Permission::any(WILDCARD, "update"),
                Permission::any(WILDCARD, "delete"),
            ],
            Self::Author => vec![
                Permission::any(WILDCARD, "create"),
                Permission::owned(WILDCARD, "update"),
                Permission::owned(WILDCARD, "delete"),
            ],
            Self::Viewer => vec![Permission::any(WILDCARD, "read")],
        }
    }

    /// Return all predefined roles, members before the roles containing them.
    pub fn all() -> Vec<PredefinedRole> {
        vec![Self::Viewer, Self::Author, Self::Editor, Self::Admin]
    }

    /// Register this role and the roles it contains, with their rules.
    /// Idempotent.
    pub async fn install(&self, store: &PolicyStore) -> Result<Role> {
        let mut order = Vec::new();
        self.collect_members_first(&mut order);

        let mut installed = None;
        for predefined in order {
            installed = Some(predefined.install_one(store).await?);
        }
        installed.ok_or_else(|| Error::role_not_found(self.id()))
    }

    fn collect_members_first(&self, order: &mut Vec<PredefinedRole>) {
        for member in self.members() {
            member.collect_members_first(order);
        }
        if !order.contains(self) {
            order.push(*self);
        }
    }

    async fn install_one(&self, store: &PolicyStore) -> Result<Role> {
        let registry = store.registry();
        let role = registry.register(self.id())?;

        let members = self
            .members()
            .iter()
            .map(|member| registry.register(member.id()))
            .collect::<Result<Vec<_>>>()?;
        registry.add_members(&role, &members)?;

        for permission in self.permissions() {
            match store.grant(&role, permission).await {
                Ok(_) | Err(Error::AlreadyExists { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(role)
    }

    /// Install every predefined role.
    pub async fn install_all(store: &PolicyStore) -> Result<Vec<Role>> {
        let mut roles = Vec::new();
        for predefined in Self::all() {
            roles.push(predefined.install(store).await?);
        }
        info!(count = roles.len(), "Installed predefined roles");
        Ok(roles)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
