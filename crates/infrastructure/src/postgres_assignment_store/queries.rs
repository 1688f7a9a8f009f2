//! Read queries shared by the pool-backed store and open transactions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};

use stampgate_application::{DirectGrant, RoleAssignment, RoleDefinition};
use stampgate_core::{AppError, AppResult, ProjectId, Scope, UserId};
use stampgate_domain::Permission;

use super::{parse_stored_permission, scope_column};

#[derive(Debug, FromRow)]
struct RoleRow {
    role_id: i64,
    role_name: String,
    description: Option<String>,
    permission: Option<String>,
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    assignment_id: i64,
    user_id: i64,
    role_id: i64,
    role_name: String,
    project_id: Option<i64>,
    assigned_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct DirectGrantRow {
    user_id: i64,
    project_id: i64,
    permission: String,
}

pub(super) async fn find_role<'e, E>(
    executor: E,
    role_name: &str,
) -> AppResult<Option<RoleDefinition>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT
            roles.id AS role_id,
            roles.name AS role_name,
            roles.description,
            permissions.name AS permission
        FROM roles
        LEFT JOIN role_permissions
            ON role_permissions.role_id = roles.id
        LEFT JOIN permissions
            ON permissions.id = role_permissions.permission_id
        WHERE roles.name = $1
        ORDER BY permissions.name
        "#,
    )
    .bind(role_name)
    .fetch_all(executor)
    .await
    .map_err(|error| AppError::Internal(format!("failed to find role: {error}")))?;

    Ok(aggregate_roles(rows)?.into_iter().next())
}

pub(super) async fn list_roles<'e, E>(executor: E) -> AppResult<Vec<RoleDefinition>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT
            roles.id AS role_id,
            roles.name AS role_name,
            roles.description,
            permissions.name AS permission
        FROM roles
        LEFT JOIN role_permissions
            ON role_permissions.role_id = roles.id
        LEFT JOIN permissions
            ON permissions.id = role_permissions.permission_id
        ORDER BY roles.name, permissions.name
        "#,
    )
    .fetch_all(executor)
    .await
    .map_err(|error| AppError::Internal(format!("failed to list roles: {error}")))?;

    aggregate_roles(rows)
}

pub(super) async fn list_roles_for_user<'e, E>(
    executor: E,
    user_id: UserId,
    scope: Scope,
) -> AppResult<Vec<RoleDefinition>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT
            roles.id AS role_id,
            roles.name AS role_name,
            roles.description,
            permissions.name AS permission
        FROM user_roles
        INNER JOIN roles
            ON roles.id = user_roles.role_id
        LEFT JOIN role_permissions
            ON role_permissions.role_id = roles.id
        LEFT JOIN permissions
            ON permissions.id = role_permissions.permission_id
        WHERE user_roles.user_id = $1
            AND user_roles.project_id IS NOT DISTINCT FROM $2
        ORDER BY roles.name, permissions.name
        "#,
    )
    .bind(user_id.as_i64())
    .bind(scope_column(scope))
    .fetch_all(executor)
    .await
    .map_err(|error| AppError::Internal(format!("failed to list user roles: {error}")))?;

    aggregate_roles(rows)
}

pub(super) async fn list_direct_permissions<'e, E>(
    executor: E,
    user_id: UserId,
    project_id: ProjectId,
) -> AppResult<Vec<Permission>>
where
    E: Executor<'e, Database = Postgres>,
{
    let values = sqlx::query_scalar::<_, String>(
        r#"
        SELECT permissions.name
        FROM user_permissions
        INNER JOIN permissions
            ON permissions.id = user_permissions.permission_id
        WHERE user_permissions.user_id = $1
            AND user_permissions.project_id = $2
        ORDER BY permissions.name
        "#,
    )
    .bind(user_id.as_i64())
    .bind(project_id.as_i64())
    .fetch_all(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!("failed to list direct permissions: {error}"))
    })?;

    values
        .iter()
        .map(|value| parse_stored_permission(value))
        .collect()
}

pub(super) async fn list_role_assignments_for_user<'e, E>(
    executor: E,
    user_id: UserId,
) -> AppResult<Vec<RoleAssignment>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, AssignmentRow>(
        r#"
        SELECT
            user_roles.id AS assignment_id,
            user_roles.user_id,
            user_roles.role_id,
            roles.name AS role_name,
            user_roles.project_id,
            user_roles.created_at AS assigned_at
        FROM user_roles
        INNER JOIN roles
            ON roles.id = user_roles.role_id
        WHERE user_roles.user_id = $1
        ORDER BY user_roles.project_id NULLS FIRST, roles.name
        "#,
    )
    .bind(user_id.as_i64())
    .fetch_all(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!("failed to list role assignments: {error}"))
    })?;

    Ok(rows
        .into_iter()
        .map(|row| RoleAssignment {
            assignment_id: row.assignment_id,
            user_id: UserId::new(row.user_id),
            role_id: row.role_id,
            role_name: row.role_name,
            scope: Scope::from_project_column(row.project_id),
            assigned_at: row.assigned_at,
        })
        .collect())
}

pub(super) async fn list_direct_grants_for_user<'e, E>(
    executor: E,
    user_id: UserId,
) -> AppResult<Vec<DirectGrant>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, DirectGrantRow>(
        r#"
        SELECT
            user_permissions.user_id,
            user_permissions.project_id,
            permissions.name AS permission
        FROM user_permissions
        INNER JOIN permissions
            ON permissions.id = user_permissions.permission_id
        WHERE user_permissions.user_id = $1
        ORDER BY user_permissions.project_id, permissions.name
        "#,
    )
    .bind(user_id.as_i64())
    .fetch_all(executor)
    .await
    .map_err(|error| AppError::Internal(format!("failed to list direct grants: {error}")))?;

    rows.into_iter()
        .map(|row| {
            Ok(DirectGrant {
                user_id: UserId::new(row.user_id),
                project_id: ProjectId::new(row.project_id),
                permission: parse_stored_permission(row.permission.as_str())?,
            })
        })
        .collect()
}

fn aggregate_roles(rows: Vec<RoleRow>) -> AppResult<Vec<RoleDefinition>> {
    let mut by_name: BTreeMap<String, RoleDefinition> = BTreeMap::new();

    for row in rows {
        let role = by_name
            .entry(row.role_name.clone())
            .or_insert_with(|| RoleDefinition {
                role_id: row.role_id,
                name: row.role_name.clone(),
                description: row.description.clone(),
                permissions: Vec::new(),
            });

        if let Some(permission_value) = row.permission {
            role.permissions
                .push(parse_stored_permission(permission_value.as_str())?);
        }
    }

    Ok(by_name.into_values().collect())
}
