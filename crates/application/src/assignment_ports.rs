use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stampgate_core::{AppResult, ProjectId, Scope, UserId};
use stampgate_domain::Permission;

/// Role definition returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    /// Stable role identifier.
    pub role_id: i64,
    /// Unique role name.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Permissions bundled by the role.
    pub permissions: Vec<Permission>,
}

/// Assignment projection mapping a user to a role in one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    /// Stable assignment identifier.
    pub assignment_id: i64,
    /// Assigned user.
    pub user_id: UserId,
    /// Role identifier.
    pub role_id: i64,
    /// Role name.
    pub role_name: String,
    /// Scope the role applies to.
    pub scope: Scope,
    /// Assignment timestamp.
    pub assigned_at: DateTime<Utc>,
}

/// One direct permission grant row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirectGrant {
    /// Granted user.
    pub user_id: UserId,
    /// Project the grant applies to.
    pub project_id: ProjectId,
    /// Granted permission.
    pub permission: Permission,
}

/// Full set of direct grants for one user in one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectPermissionSet {
    /// Granted user.
    pub user_id: UserId,
    /// Project the grants apply to.
    pub project_id: ProjectId,
    /// Granted permissions.
    pub permissions: BTreeSet<Permission>,
}

/// Outcome of ensuring a role row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredRole {
    /// Stored role identifier.
    pub role_id: i64,
    /// Whether the row was inserted by this call.
    pub created: bool,
}

/// Read access to persisted roles, assignments and direct grants.
///
/// Readers never apply policy. Missing rows yield empty results, not errors.
#[async_trait]
pub trait AssignmentReader: Send + Sync {
    /// Finds a role and its bundled permissions by name.
    async fn find_role(&self, role_name: &str) -> AppResult<Option<RoleDefinition>>;

    /// Lists every stored role with its bundle, ordered by name.
    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>>;

    /// Lists roles assigned to a user for exactly one scope.
    async fn list_roles_for_user(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Vec<RoleDefinition>>;

    /// Lists direct grants for a user in one project.
    async fn list_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<Vec<Permission>>;

    /// Lists every role assignment of a user across all scopes.
    async fn list_role_assignments_for_user(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<RoleAssignment>>;

    /// Lists every direct grant of a user across all projects.
    async fn list_direct_grants_for_user(&self, user_id: UserId) -> AppResult<Vec<DirectGrant>>;
}

/// Unit of work over the assignment tables.
///
/// Reads issued through the transaction observe its own uncommitted writes.
/// Dropping the transaction without [`AssignmentTransaction::commit`] discards
/// every write.
#[async_trait]
pub trait AssignmentTransaction: AssignmentReader {
    /// Blocks other transactions from locking the same `(user, scope)` slot
    /// until this transaction ends.
    ///
    /// Callers lock every slot they read or write before issuing any read,
    /// in ascending `(scope, user)` order.
    async fn lock_slot(&self, user_id: UserId, scope: Scope) -> AppResult<()>;

    /// Inserts a role assignment.
    ///
    /// Fails with `Conflict` when the user already holds a role in the scope.
    async fn insert_role_assignment(
        &self,
        user_id: UserId,
        role: &RoleDefinition,
        scope: Scope,
    ) -> AppResult<RoleAssignment>;

    /// Deletes a role assignment, returning whether a row was removed.
    async fn delete_role_assignment(
        &self,
        user_id: UserId,
        role_name: &str,
        scope: Scope,
    ) -> AppResult<bool>;

    /// Replaces every direct grant of a user in one project.
    async fn replace_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()>;

    /// Inserts a permission row if absent, returning whether it was created.
    async fn ensure_permission(&self, permission: Permission) -> AppResult<bool>;

    /// Inserts a role if absent, otherwise refreshes its description.
    async fn ensure_role(&self, name: &str, description: &str) -> AppResult<EnsuredRole>;

    /// Links a permission to a role if absent, returning whether it was linked.
    async fn ensure_role_permission(&self, role_id: i64, permission: Permission)
    -> AppResult<bool>;

    /// Commits all writes.
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Persistent assignment storage.
#[async_trait]
pub trait AssignmentStore: AssignmentReader {
    /// Opens a transaction.
    async fn begin(&self) -> AppResult<Box<dyn AssignmentTransaction>>;
}
