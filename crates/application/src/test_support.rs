use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use stampgate_core::{AppError, AppResult, ProjectId, Scope, UserId};
use stampgate_domain::{Permission, PermissionCatalog};

use crate::{
    AssignmentReader, AssignmentStore, AssignmentTransaction, DirectGrant, EnsuredRole,
    RoleAssignment, RoleDefinition,
};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub permissions: BTreeSet<Permission>,
    pub roles: Vec<RoleDefinition>,
    pub assignments: Vec<RoleAssignment>,
    pub direct_grants: BTreeSet<DirectGrant>,
    pub commits: usize,
    pub locked_slots: Vec<(Scope, UserId)>,
    next_id: i64,
}

impl FakeState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_role(&self, role_name: &str) -> Option<RoleDefinition> {
        self.roles.iter().find(|role| role.name == role_name).cloned()
    }

    fn roles_for_user(&self, user_id: UserId, scope: Scope) -> Vec<RoleDefinition> {
        self.assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id && assignment.scope == scope)
            .filter_map(|assignment| {
                self.roles
                    .iter()
                    .find(|role| role.role_id == assignment.role_id)
                    .cloned()
            })
            .collect()
    }

    fn direct_permissions(&self, user_id: UserId, project_id: ProjectId) -> Vec<Permission> {
        self.direct_grants
            .iter()
            .filter(|grant| grant.user_id == user_id && grant.project_id == project_id)
            .map(|grant| grant.permission)
            .collect()
    }

    fn insert_assignment(
        &mut self,
        user_id: UserId,
        role: &RoleDefinition,
        scope: Scope,
    ) -> AppResult<RoleAssignment> {
        if self
            .assignments
            .iter()
            .any(|assignment| assignment.user_id == user_id && assignment.scope == scope)
        {
            return Err(AppError::Conflict(format!(
                "user '{user_id}' already holds a role in {scope}"
            )));
        }

        let assignment = RoleAssignment {
            assignment_id: self.next_id(),
            user_id,
            role_id: role.role_id,
            role_name: role.name.clone(),
            scope,
            assigned_at: Utc::now(),
        };
        self.assignments.push(assignment.clone());
        Ok(assignment)
    }
}

/// Store double whose transactions write straight through.
#[derive(Clone, Default)]
pub(crate) struct FakeAssignmentStore {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeAssignmentStore {
    pub async fn with_catalog_roles(catalog: &PermissionCatalog) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().await;
            for template in catalog.roles() {
                let role_id = state.next_id();
                state.roles.push(RoleDefinition {
                    role_id,
                    name: template.name().to_owned(),
                    description: Some(template.description().to_owned()),
                    permissions: template.permissions().to_vec(),
                });
            }
        }
        store
    }

    pub async fn add_role(&self, name: &str, permissions: Vec<Permission>) {
        let mut state = self.state.lock().await;
        let role_id = state.next_id();
        state.roles.push(RoleDefinition {
            role_id,
            name: name.to_owned(),
            description: None,
            permissions,
        });
    }

    pub async fn assign(&self, user_id: UserId, role_name: &str, scope: Scope) {
        let mut state = self.state.lock().await;
        let Some(role) = state.find_role(role_name) else {
            panic!("role '{role_name}' is not defined in the fake store");
        };
        let role_id = state.next_id();
        state.assignments.push(RoleAssignment {
            assignment_id: role_id,
            user_id,
            role_id: role.role_id,
            role_name: role.name,
            scope,
            assigned_at: Utc::now(),
        });
    }

    pub async fn grant(&self, user_id: UserId, project_id: ProjectId, permission: Permission) {
        self.state.lock().await.direct_grants.insert(DirectGrant {
            user_id,
            project_id,
            permission,
        });
    }

    pub async fn assignment_count(&self, user_id: UserId, scope: Scope) -> usize {
        self.state
            .lock()
            .await
            .assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id && assignment.scope == scope)
            .count()
    }
}

#[async_trait]
impl AssignmentReader for FakeAssignmentStore {
    async fn find_role(&self, role_name: &str) -> AppResult<Option<RoleDefinition>> {
        Ok(self.state.lock().await.find_role(role_name))
    }

    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        let mut roles = self.state.lock().await.roles.clone();
        roles.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(roles)
    }

    async fn list_roles_for_user(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Vec<RoleDefinition>> {
        Ok(self.state.lock().await.roles_for_user(user_id, scope))
    }

    async fn list_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<Vec<Permission>> {
        Ok(self
            .state
            .lock()
            .await
            .direct_permissions(user_id, project_id))
    }

    async fn list_role_assignments_for_user(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<RoleAssignment>> {
        Ok(self
            .state
            .lock()
            .await
            .assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_direct_grants_for_user(&self, user_id: UserId) -> AppResult<Vec<DirectGrant>> {
        Ok(self
            .state
            .lock()
            .await
            .direct_grants
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .copied()
            .collect())
    }
}

#[async_trait]
impl AssignmentTransaction for FakeAssignmentStore {
    async fn lock_slot(&self, user_id: UserId, scope: Scope) -> AppResult<()> {
        self.state.lock().await.locked_slots.push((scope, user_id));
        Ok(())
    }

    async fn insert_role_assignment(
        &self,
        user_id: UserId,
        role: &RoleDefinition,
        scope: Scope,
    ) -> AppResult<RoleAssignment> {
        self.state
            .lock()
            .await
            .insert_assignment(user_id, role, scope)
    }

    async fn delete_role_assignment(
        &self,
        user_id: UserId,
        role_name: &str,
        scope: Scope,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
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
        let mut state = self.state.lock().await;
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
        Ok(self.state.lock().await.permissions.insert(permission))
    }

    async fn ensure_role(&self, name: &str, description: &str) -> AppResult<EnsuredRole> {
        let mut state = self.state.lock().await;
        if let Some(role) = state.roles.iter_mut().find(|role| role.name == name) {
            role.description = Some(description.to_owned());
            return Ok(EnsuredRole {
                role_id: role.role_id,
                created: false,
            });
        }

        let role_id = state.next_id();
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
        let mut state = self.state.lock().await;
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
        self.state.lock().await.commits += 1;
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for FakeAssignmentStore {
    async fn begin(&self) -> AppResult<Box<dyn AssignmentTransaction>> {
        Ok(Box::new(self.clone()))
    }
}

pub(crate) fn user(value: i64) -> UserId {
    UserId::new(value)
}

pub(crate) fn project(value: i64) -> Scope {
    Scope::Project(ProjectId::new(value))
}
