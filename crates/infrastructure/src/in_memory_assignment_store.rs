
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};

use stampgate_application::{
    AssignmentReader, AssignmentStore, AssignmentTransaction, DirectGrant, EnsuredRole,
    RoleAssignment, RoleDefinition,
};
use stampgate_core::{AppError, AppResult, ProjectId, Scope, UserId};
use stampgate_domain::Permission;

#[derive(Debug, Clone, Default)]
struct AssignmentState {
    permissions: BTreeSet<Permission>,
    roles: Vec<RoleDefinition>,
    assignments: Vec<RoleAssignment>,
    direct_grants: BTreeSet<DirectGrant>,
    last_role_id: i64,
    last_assignment_id: i64,
}

impl AssignmentState {
    fn find_role(&self, role_name: &str) -> Option<RoleDefinition> {
        self.roles.iter().find(|role| role.name == role_name).cloned()
    }

    fn sorted_roles(&self) -> Vec<RoleDefinition> {
        let mut roles = self.roles.clone();
        roles.sort_by(|left, right| left.name.cmp(&right.name));
        roles
    }

    fn roles_for_user(&self, user_id: UserId, scope: Scope) -> Vec<RoleDefinition> {
        let mut roles: Vec<RoleDefinition> = self
            .assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id && assignment.scope == scope)
            .filter_map(|assignment| {
                self.roles
                    .iter()
                    .find(|role| role.role_id == assignment.role_id)
                    .cloned()
            })
            .collect();
        roles.sort_by(|left, right| left.name.cmp(&right.name));
        roles
    }

    fn direct_permissions(&self, user_id: UserId, project_id: ProjectId) -> Vec<Permission> {
        self.direct_grants
            .iter()
            .filter(|grant| grant.user_id == user_id && grant.project_id == project_id)
            .map(|grant| grant.permission)
            .collect()
    }

    fn role_assignments_for_user(&self, user_id: UserId) -> Vec<RoleAssignment> {
        let mut assignments: Vec<RoleAssignment> = self
            .assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id)
            .cloned()
            .collect();
        assignments.sort_by(|left, right| {
            left.scope
                .cmp(&right.scope)
                .then_with(|| left.role_name.cmp(&right.role_name))
        });
        assignments
    }

    fn direct_grants_for_user(&self, user_id: UserId) -> Vec<DirectGrant> {
        self.direct_grants
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .copied()
            .collect()
    }
}

/// In-memory assignment store.
///
/// Transactions hold the write lock for their whole lifetime and mutate a
/// private working copy; store reads wait until the open transaction ends.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssignmentStore {
    state: Arc<RwLock<AssignmentState>>,
}

impl InMemoryAssignmentStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentReader for InMemoryAssignmentStore {
    async fn find_role(&self, role_name: &str) -> AppResult<Option<RoleDefinition>> {
        Ok(self.state.read().await.find_role(role_name))
    }

    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        Ok(self.state.read().await.sorted_roles())
    }

    async fn list_roles_for_user(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Vec<RoleDefinition>> {
        Ok(self.state.read().await.roles_for_user(user_id, scope))
    }

    async fn list_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<Vec<Permission>> {
        Ok(self
            .state
            .read()
            .await
            .direct_permissions(user_id, project_id))
    }

    async fn list_role_assignments_for_user(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<RoleAssignment>> {
        Ok(self.state.read().await.role_assignments_for_user(user_id))
    }

    async fn list_direct_grants_for_user(&self, user_id: UserId) -> AppResult<Vec<DirectGrant>> {
        Ok(self.state.read().await.direct_grants_for_user(user_id))
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn begin(&self) -> AppResult<Box<dyn AssignmentTransaction>> {
        let committed = self.state.clone().write_owned().await;
        let working = (*committed).clone();

        Ok(Box::new(InMemoryAssignmentTransaction {
            committed,
            working: Mutex::new(working),
        }))
    }
}

struct InMemoryAssignmentTransaction {
    committed: OwnedRwLockWriteGuard<AssignmentState>,
    working: Mutex<AssignmentState>,
}

#[async_trait]
impl AssignmentReader for InMemoryAssignmentTransaction {
    async fn find_role(&self, role_name: &str) -> AppResult<Option<RoleDefinition>> {
        Ok(self.working.lock().await.find_role(role_name))
    }

    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        Ok(self.working.lock().await.sorted_roles())
    }

    async fn list_roles_for_user(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Vec<RoleDefinition>> {
        Ok(self.working.lock().await.roles_for_user(user_id, scope))
    }

    async fn list_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<Vec<Permission>> {
        Ok(self
            .working
            .lock()
            .await
            .direct_permissions(user_id, project_id))
    }

    async fn list_role_assignments_for_user(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<RoleAssignment>> {
        Ok(self.working.lock().await.role_assignments_for_user(user_id))
    }

    async fn list_direct_grants_for_user(&self, user_id: UserId) -> AppResult<Vec<DirectGrant>> {
        Ok(self.working.lock().await.direct_grants_for_user(user_id))
    }
}

#[async_trait]
impl AssignmentTransaction for InMemoryAssignmentTransaction {
    // The transaction already holds the store's write lock.
    async fn lock_slot(&self, _user_id: UserId, _scope: Scope) -> AppResult<()> {
        Ok(())
    }

    async fn insert_role_assignment(
        &self,
        user_id: UserId,
        role: &RoleDefinition,
        scope: Scope,
    ) -> AppResult<RoleAssignment> {
        let mut state = self.working.lock().await;

        if state
            .assignments
            .iter()
            .any(|assignment| assignment.user_id == user_id && assignment.scope == scope)
        {
            return Err(AppError::Conflict(format!(
                "user '{user_id}' already holds a role in {scope}"
            )));
        }

        if !state.roles.iter().any(|stored| stored.role_id == role.role_id) {
            return Err(AppError::NotFound(format!(
                "role '{}' was not found",
                role.name
            )));
        }

        state.last_assignment_id += 1;
        let assignment = RoleAssignment {
            assignment_id: state.last_assignment_id,
            user_id,
            role_id: role.role_id,
            role_name: role.name.clone(),
            scope,
            assigned_at: Utc::now(),
        };
        state.assignments.push(assignment.clone());

        Ok(assignment)
    }

    async fn delete_role_assignment(
        &self,
        user_id: UserId,
        role_name: &str,
        scope: Scope,
    ) -> AppResult<bool> {
        let mut state = self.working.lock().await;
        let before = state.assignments.len();
        state.assignments.retain(|assignment| {
            !(assignment.user_id == user_id
                && assignment.scope == scope
                && assignment.role_name == role_name)
        });

        Ok(state.assignments.len() != before)
    }

    async fn replace_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()> {
        let mut state = self.working.lock().await;

        if let Some(missing) = permissions
            .iter()
            .find(|permission| !state.permissions.contains(*permission))
        {
            return Err(AppError::NotFound(format!(
                "permission '{missing}' was not found"
            )));
        }

        state
            .direct_grants
            .retain(|grant| !(grant.user_id == user_id && grant.project_id == project_id));
        state
            .direct_grants
            .extend(permissions.iter().map(|permission| DirectGrant {
                user_id,
                project_id,
                permission: *permission,
            }));

        Ok(())
    }

    async fn ensure_permission(&self, permission: Permission) -> AppResult<bool> {
        Ok(self.working.lock().await.permissions.insert(permission))
    }

    async fn ensure_role(&self, name: &str, description: &str) -> AppResult<EnsuredRole> {
        let mut state = self.working.lock().await;

        if let Some(role) = state.roles.iter_mut().find(|role| role.name == name) {
            role.description = Some(description.to_owned());
            return Ok(EnsuredRole {
                role_id: role.role_id,
                created: false,
            });
        }

        state.last_role_id += 1;
        let role_id = state.last_role_id;
        state.roles.push(RoleDefinition {
            role_id,
            name: name.to_owned(),
            description: Some(description.to_owned()),
            permissions: Vec::new(),
        });

        Ok(EnsuredRole {
            role_id,
            created: true,
        })
    }

    async fn ensure_role_permission(
        &self,
        role_id: i64,
        permission: Permission,
    ) -> AppResult<bool> {
        let mut state = self.working.lock().await;

        if !state.permissions.contains(&permission) {
            return Err(AppError::NotFound(format!(
                "permission '{permission}' was not found"
            )));
        }

        let Some(role) = state.roles.iter_mut().find(|role| role.role_id == role_id) else {
            return Err(AppError::NotFound(format!("role '{role_id}' was not found")));
        };

        if role.permissions.contains(&permission) {
            return Ok(false);
        }

        role.permissions.push(permission);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            mut committed,
            working,
        } = *self;
        *committed = working.into_inner();
        Ok(())
    }
}
