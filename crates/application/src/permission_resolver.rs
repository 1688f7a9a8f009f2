mod view;


use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use stampgate_core::{AppError, AppResult, ProjectId, Scope, UserId};
use stampgate_domain::{MatchMode, Permission, PermissionCatalog, PermissionRequirement, grants};

use crate::{AssignmentStore, RoleDefinition};

pub use view::PermissionView;

/// Direct and effective permissions of one user in one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSummary {
    /// Permissions granted directly, independent of roles.
    pub direct: BTreeSet<Permission>,
    /// Union of role-derived and direct permissions.
    pub effective: BTreeSet<Permission>,
}

/// Roles and direct grants a user holds in one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAccess {
    /// Scope of the entries.
    pub scope: Scope,
    /// Assigned role names.
    pub roles: Vec<String>,
    /// Direct grants. Always empty for the global scope.
    pub direct_permissions: BTreeSet<Permission>,
}

/// Answers authorization questions against the live assignment store.
///
/// Nothing is cached: every call reads storage again, so a mutation made by
/// the guard is visible to the very next call.
#[derive(Clone)]
pub struct PermissionResolver {
    catalog: Arc<PermissionCatalog>,
    store: Arc<dyn AssignmentStore>,
}

impl PermissionResolver {
    /// Creates a resolver from a catalog and a store.
    #[must_use]
    pub fn new(catalog: Arc<PermissionCatalog>, store: Arc<dyn AssignmentStore>) -> Self {
        Self { catalog, store }
    }

    fn view(&self) -> PermissionView<'_> {
        PermissionView::new(&self.catalog, &*self.store)
    }

    /// Returns the catalog used for ranking.
    #[must_use]
    pub fn catalog(&self) -> &PermissionCatalog {
        self.catalog.as_ref()
    }

    /// Every stored role with its description and bundle, ordered by name.
    ///
    /// Includes roles created outside the catalog's default bundles.
    pub async fn stored_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        self.store.list_roles().await
    }

    /// Roles assigned to the user for exactly `scope`.
    pub async fn roles_of(&self, user_id: UserId, scope: Scope) -> AppResult<Vec<RoleDefinition>> {
        self.view().roles_of(user_id, scope).await
    }

    /// Effective permission set of the user in `scope`.
    pub async fn effective_permissions(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<BTreeSet<Permission>> {
        self.view().effective_permissions(user_id, scope).await
    }

    /// Returns whether the user currently holds the permission in `scope`.
    pub async fn has(
        &self,
        user_id: UserId,
        permission: Permission,
        scope: Scope,
    ) -> AppResult<bool> {
        self.view().has(user_id, permission, scope).await
    }

    /// Highest-ranked role of the user in `scope`.
    pub async fn highest_role(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Option<RoleDefinition>> {
        self.view().highest_role(user_id, scope).await
    }

    /// Hierarchy rank of a role name.
    #[must_use]
    pub fn rank(&self, role_name: Option<&str>) -> usize {
        self.catalog.rank(role_name)
    }

    /// Direct grants of the user in a project.
    pub async fn direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<BTreeSet<Permission>> {
        Ok(self
            .store
            .list_direct_permissions(user_id, project_id)
            .await?
            .into_iter()
            .collect())
    }

    /// Direct and effective permissions of the user in a project.
    pub async fn permission_summary(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<PermissionSummary> {
        let direct = self.direct_permissions(user_id, project_id).await?;
        let effective = self
            .effective_permissions(user_id, Scope::Project(project_id))
            .await?;

        Ok(PermissionSummary { direct, effective })
    }

    /// Evaluates a requirement against the user's effective permissions.
    pub async fn evaluate(
        &self,
        user_id: UserId,
        scope: Scope,
        requirement: &PermissionRequirement,
    ) -> AppResult<bool> {
        let effective = self.effective_permissions(user_id, scope).await?;
        Ok(requirement.is_satisfied(|permission| grants(&effective, permission)))
    }

    /// Ensures the user satisfies a requirement in `scope`.
    pub async fn require(
        &self,
        user_id: UserId,
        scope: Scope,
        requirement: &PermissionRequirement,
    ) -> AppResult<()> {
        let effective = self.effective_permissions(user_id, scope).await?;
        if requirement.is_satisfied(|permission| grants(&effective, permission)) {
            return Ok(());
        }

        let detail = match requirement.mode() {
            MatchMode::Any => format!("required: {}", join(requirement.permissions())),
            MatchMode::All => format!(
                "missing: {}",
                join(&requirement.unmet(|permission| grants(&effective, permission)))
            ),
        };
        debug!(user_id = %user_id, scope = %scope, %detail, "permission requirement not met");

        Err(AppError::Forbidden(format!(
            "user '{user_id}' lacks permission in {scope} ({detail})"
        )))
    }

    /// Whether the user holds `admin:all` in any scope it has standing in.
    pub async fn holds_admin_anywhere(&self, user_id: UserId) -> AppResult<bool> {
        for scope in self.scopes_for_user(user_id).await? {
            if self.has(user_id, Permission::AdminAll, scope).await? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Per-scope roles and direct grants of the user, ordered by scope.
    pub async fn access_overview(&self, user_id: UserId) -> AppResult<Vec<ScopeAccess>> {
        let mut entries: BTreeMap<Scope, ScopeAccess> = BTreeMap::new();

        for assignment in self.store.list_role_assignments_for_user(user_id).await? {
            entries
                .entry(assignment.scope)
                .or_insert_with(|| empty_access(assignment.scope))
                .roles
                .push(assignment.role_name);
        }

        for grant in self.store.list_direct_grants_for_user(user_id).await? {
            let scope = Scope::Project(grant.project_id);
            entries
                .entry(scope)
                .or_insert_with(|| empty_access(scope))
                .direct_permissions
                .insert(grant.permission);
        }

        Ok(entries
            .into_values()
            .map(|mut access| {
                access.roles.sort();
                access.roles.dedup();
                access
            })
            .collect())
    }

    async fn scopes_for_user(&self, user_id: UserId) -> AppResult<BTreeSet<Scope>> {
        let mut scopes: BTreeSet<Scope> = self
            .store
            .list_role_assignments_for_user(user_id)
            .await?
            .into_iter()
            .map(|assignment| assignment.scope)
            .collect();
        scopes.extend(
            self.store
                .list_direct_grants_for_user(user_id)
                .await?
                .into_iter()
                .map(|grant| Scope::Project(grant.project_id)),
        );

        Ok(scopes)
    }
}

fn empty_access(scope: Scope) -> ScopeAccess {
    ScopeAccess {
        scope,
        roles: Vec::new(),
        direct_permissions: BTreeSet::new(),
    }
}

fn join(permissions: &[Permission]) -> String {
    permissions
        .iter()
        .map(Permission::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
