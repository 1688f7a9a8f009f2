use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use stampgate_application::{
    AssignmentReader, AssignmentTransaction, DirectGrant, EnsuredRole, RoleAssignment,
    RoleDefinition,
};
use stampgate_core::{AppError, AppResult, ProjectId, Scope, UserId};
use stampgate_domain::Permission;

use super::{map_assignment_conflict, map_slot_lock_error, queries, scope_column};

#[derive(Debug, FromRow)]
struct InsertedAssignmentRow {
    assignment_id: i64,
    assigned_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct EnsuredRoleRow {
    role_id: i64,
    created: bool,
}

/// Open database transaction over the assignment tables.
///
/// Dropping it without committing rolls back.
pub(super) struct PostgresAssignmentTransaction {
    transaction: Mutex<Transaction<'static, Postgres>>,
}

impl PostgresAssignmentTransaction {
    pub(super) fn new(transaction: Transaction<'static, Postgres>) -> Self {
        Self {
            transaction: Mutex::new(transaction),
        }
    }

    async fn permission_id(
        transaction: &mut Transaction<'static, Postgres>,
        permission: Permission,
    ) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id
            FROM permissions
            WHERE name = $1
            LIMIT 1
            "#,
        )
        .bind(permission.as_str())
        .fetch_optional(&mut **transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to resolve permission: {error}")))?
        .ok_or_else(|| AppError::NotFound(format!("permission '{permission}' was not found")))
    }
}

#[async_trait]
impl AssignmentReader for PostgresAssignmentTransaction {
    async fn find_role(&self, role_name: &str) -> AppResult<Option<RoleDefinition>> {
        let mut transaction = self.transaction.lock().await;
        queries::find_role(&mut **transaction, role_name).await
    }

    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        let mut transaction = self.transaction.lock().await;
        queries::list_roles(&mut **transaction).await
    }

    async fn list_roles_for_user(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AppResult<Vec<RoleDefinition>> {
        let mut transaction = self.transaction.lock().await;
        queries::list_roles_for_user(&mut **transaction, user_id, scope).await
    }

    async fn list_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
    ) -> AppResult<Vec<Permission>> {
        let mut transaction = self.transaction.lock().await;
        queries::list_direct_permissions(&mut **transaction, user_id, project_id).await
    }

    async fn list_role_assignments_for_user(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<RoleAssignment>> {
        let mut transaction = self.transaction.lock().await;
        queries::list_role_assignments_for_user(&mut **transaction, user_id).await
    }

    async fn list_direct_grants_for_user(&self, user_id: UserId) -> AppResult<Vec<DirectGrant>> {
        let mut transaction = self.transaction.lock().await;
        queries::list_direct_grants_for_user(&mut **transaction, user_id).await
    }
}

#[async_trait]
impl AssignmentTransaction for PostgresAssignmentTransaction {
    async fn lock_slot(&self, user_id: UserId, scope: Scope) -> AppResult<()> {
        let mut transaction = self.transaction.lock().await;

        // Released by Postgres at commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("stampgate:user_slot:{user_id}:{scope}"))
            .execute(&mut **transaction)
            .await
            .map_err(|error| map_slot_lock_error(error, user_id, scope))?;

        debug!(user_id = %user_id, scope = %scope, "assignment slot locked");
        Ok(())
    }

    async fn insert_role_assignment(
        &self,
        user_id: UserId,
        role: &RoleDefinition,
        scope: Scope,
    ) -> AppResult<RoleAssignment> {
        let mut transaction = self.transaction.lock().await;

        let row = sqlx::query_as::<_, InsertedAssignmentRow>(
            r#"
            INSERT INTO user_roles (user_id, role_id, project_id)
            VALUES ($1, $2, $3)
            RETURNING id AS assignment_id, created_at AS assigned_at
            "#,
        )
        .bind(user_id.as_i64())
        .bind(role.role_id)
        .bind(scope_column(scope))
        .fetch_one(&mut **transaction)
        .await
        .map_err(|error| map_assignment_conflict(error, user_id, scope))?;

        Ok(RoleAssignment {
            assignment_id: row.assignment_id,
            user_id,
            role_id: role.role_id,
            role_name: role.name.clone(),
            scope,
            assigned_at: row.assigned_at,
        })
    }

    async fn delete_role_assignment(
        &self,
        user_id: UserId,
        role_name: &str,
        scope: Scope,
    ) -> AppResult<bool> {
        let mut transaction = self.transaction.lock().await;

        let rows_affected = sqlx::query(
            r#"
            DELETE FROM user_roles
            USING roles
            WHERE user_roles.role_id = roles.id
                AND user_roles.user_id = $1
                AND roles.name = $2
                AND user_roles.project_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(user_id.as_i64())
        .bind(role_name)
        .bind(scope_column(scope))
        .execute(&mut **transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to remove role: {error}")))?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn replace_direct_permissions(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()> {
        let mut transaction = self.transaction.lock().await;

        sqlx::query(
            r#"
            DELETE FROM user_permissions
            WHERE user_id = $1 AND project_id = $2
            "#,
        )
        .bind(user_id.as_i64())
        .bind(project_id.as_i64())
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to clear direct permissions: {error}"))
        })?;

        for permission in permissions {
            let permission_id = Self::permission_id(&mut transaction, *permission).await?;

            sqlx::query(
                r#"
                INSERT INTO user_permissions (user_id, project_id, permission_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(user_id.as_i64())
            .bind(project_id.as_i64())
            .bind(permission_id)
            .execute(&mut **transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to persist direct permission: {error}"))
            })?;
        }

        Ok(())
    }

    async fn ensure_permission(&self, permission: Permission) -> AppResult<bool> {
        let mut transaction = self.transaction.lock().await;

        let rows_affected = sqlx::query(
            r#"
            INSERT INTO permissions (name, resource, action)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(permission.as_str())
        .bind(permission.resource())
        .bind(permission.action())
        .execute(&mut **transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to seed permission: {error}")))?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn ensure_role(&self, name: &str, description: &str) -> AppResult<EnsuredRole> {
        let mut transaction = self.transaction.lock().await;

        // xmax is zero only for rows inserted by this statement.
        let row = sqlx::query_as::<_, EnsuredRoleRow>(
            r#"
            INSERT INTO roles (name, description)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE
            SET description = EXCLUDED.description
            RETURNING id AS role_id, (xmax = 0) AS created
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(&mut **transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to seed role: {error}")))?;

        Ok(EnsuredRole {
            role_id: row.role_id,
            created: row.created,
        })
    }

    async fn ensure_role_permission(
        &self,
        role_id: i64,
        permission: Permission,
    ) -> AppResult<bool> {
        let mut transaction = self.transaction.lock().await;
        let permission_id = Self::permission_id(&mut transaction, permission).await?;

        let rows_affected = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut **transaction)
        .await
        .map_err(|error| match &error {
            sqlx::Error::Database(database_error)
                if database_error.code().as_deref() == Some("23503") =>
            {
                AppError::NotFound(format!("role '{role_id}' was not found"))
            }
            _ => AppError::Internal(format!("failed to seed role permission: {error}")),
        })?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.transaction
            .into_inner()
            .commit()
            .await
            .map_err(|error| AppError::Internal(format!("failed to commit transaction: {error}")))?;

        debug!("assignment transaction committed");
        Ok(())
    }
}
