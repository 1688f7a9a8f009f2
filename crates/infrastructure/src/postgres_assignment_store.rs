mod queries;
#[cfg(test)]
mod tests;
mod transaction;

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use stampgate_application::{
    AssignmentReader, AssignmentStore, AssignmentTransaction, DirectGrant, RoleAssignment,
    RoleDefinition,
};
use stampgate_core::{AppError, AppResult, ProjectId, Scope, UserId};
use stampgate_domain::Permission;

use transaction::PostgresAssignmentTransaction;

/// PostgreSQL-backed store for roles, assignments and direct grants.
#[derive(Clone)]
pub struct PostgresAssignmentStore {
    pool: PgPool,
}

impl PostgresAssignmentStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentReader for PostgresAssignmentStore {
    async fn find_role(&self, role_name: &str) -> AppResult<Option<RoleDefinition>> {
        queries::find_role(&self.pool, role_name).await
    }

    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        queries::list_roles(&self.pool).await
    }

    async fn list_roles_for_user(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Vec<RoleDefinition>> {
        queries::list_roles_for_user(&self.pool, user_id, scope).await
    }

    async fn list_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<Vec<Permission>> {
        queries::list_direct_permissions(&self.pool, user_id, project_id).await
    }

    async fn list_role_assignments_for_user(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<RoleAssignment>> {
        queries::list_role_assignments_for_user(&self.pool, user_id).await
    }

    async fn list_direct_grants_for_user(&self, user_id: UserId) -> AppResult<Vec<DirectGrant>> {
        queries::list_direct_grants_for_user(&self.pool, user_id).await
    }
}

#[async_trait]
impl AssignmentStore for PostgresAssignmentStore {
    async fn begin(&self) -> AppResult<Box<dyn AssignmentTransaction>> {
        let transaction =
            self.pool.begin().await.map_err(|error| {
                AppError::Internal(format!("failed to begin transaction: {error}"))
            })?;

        debug!("assignment transaction opened");
        Ok(Box::new(PostgresAssignmentTransaction::new(transaction)))
    }
}

fn parse_stored_permission(value: &str) -> AppResult<Permission> {
    Permission::from_str(value).map_err(|error| {
        AppError::Internal(format!("invalid stored permission '{value}': {error}"))
    })
}

fn scope_column(scope: Scope) -> Option<i64> {
    scope.project_id().map(|project_id| project_id.as_i64())
}

fn map_assignment_conflict(error: sqlx::Error, user_id: UserId, scope: Scope) -> AppError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("23505")
    {
        return AppError::Conflict(format!("user '{user_id}' already holds a role in {scope}"));
    }

    AppError::Internal(format!("failed to assign role: {error}"))
}

fn map_slot_lock_error(error: sqlx::Error, user_id: UserId, scope: Scope) -> AppError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("40P01")
    {
        return AppError::Conflict(format!(
            "concurrent change to user '{user_id}' in {scope}; retry"
        ));
    }

    AppError::Internal(format!("failed to lock assignment slot: {error}"))
}
