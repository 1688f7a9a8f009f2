use std::collections::{BTreeMap, BTreeSet};

use stampgate_core::{AppResult, Scope, UserId};
use stampgate_domain::{Permission, PermissionCatalog, grants};

use crate::{AssignmentReader, RoleDefinition};

/// Authorization primitives evaluated against one reader.
///
/// The resolver builds a view over the store; the guard builds one over its
/// open transaction so that checks and writes observe the same state.
#[derive(Clone, Copy)]
pub struct PermissionView<'a> {
    catalog: &'a PermissionCatalog,
    reader: &'a dyn AssignmentReader,
}

impl<'a> PermissionView<'a> {
    /// Creates a view over a reader.
    #[must_use]
    pub fn new(catalog: &'a PermissionCatalog, reader: &'a dyn AssignmentReader) -> Self {
        Self { catalog, reader }
    }

    /// Returns the catalog the view ranks roles with.
    #[must_use]
    pub fn catalog(&self) -> &'a PermissionCatalog {
        self.catalog
    }

    /// Roles assigned to the user for exactly `scope`, ordered by name.
    pub async fn roles_of(&self, user_id: UserId, scope: Scope) -> AppResult<Vec<RoleDefinition>> {
        let roles: BTreeMap<String, RoleDefinition> = self
            .reader
            .list_roles_for_user(user_id, scope)
            .await?
            .into_iter()
            .map(|role| (role.name.clone(), role))
            .collect();

        Ok(roles.into_values().collect())
    }

    /// Union of role bundles and, for project scopes, direct grants.
    pub async fn effective_permissions(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<BTreeSet<Permission>> {
        let mut permissions: BTreeSet<Permission> = self
            .roles_of(user_id, scope)
            .await?
            .into_iter()
            .flat_map(|role| role.permissions)
            .collect();

        if let Some(project_id) = scope.project_id() {
            permissions.extend(
                self.reader
                    .list_direct_permissions(user_id, project_id)
                    .await?,
            );
        }

        Ok(permissions)
    }

    /// Whether the user holds `permission` (or `admin:all`) in `scope`.
    pub async fn has(
        &self,
        user_id: UserId,
        permission: Permission,
        scope: Scope,
    ) -> AppResult<bool> {
        let effective = self.effective_permissions(user_id, scope).await?;
        Ok(grants(&effective, permission))
    }

    /// The assigned role with the lowest rank; ties go to the smaller name.
    pub async fn highest_role(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Option<RoleDefinition>> {
        Ok(self
            .roles_of(user_id, scope)
            .await?
            .into_iter()
            .min_by(|left, right| {
                self.rank_of(Some(left))
                    .cmp(&self.rank_of(Some(right)))
                    .then_with(|| left.name.cmp(&right.name))
            }))
    }

    /// Rank of a stored role, or the sentinel for `None`.
    #[must_use]
    pub fn rank_of(&self, role: Option<&RoleDefinition>) -> usize {
        self.catalog.rank(role.map(|value| value.name.as_str()))
    }
}
