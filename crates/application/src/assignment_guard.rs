
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use stampgate_core::{AppError, AppResult, NonEmptyString, Scope, UserId};
use stampgate_domain::{Permission, PermissionCatalog, grants};

use crate::{
    AssignmentStore, AssignmentTransaction, DirectPermissionSet, PermissionView, RoleAssignment,
};

/// Mutates role assignments and direct grants on behalf of an acting user.
///
/// Every mutation runs inside one store transaction that first locks the
/// `(user, scope)` slots of the actor and the target. The existence checks,
/// the escalation checks and the write then observe the same state, and
/// concurrent mutations touching either slot run one after the other. The
/// storage uniqueness constraint on `(user, scope)` still backs the
/// one-role-per-scope rule.
#[derive(Clone)]
pub struct AssignmentGuard {
    catalog: Arc<PermissionCatalog>,
    store: Arc<dyn AssignmentStore>,
}

impl AssignmentGuard {
    /// Creates a guard from a catalog and a store.
    #[must_use]
    pub fn new(catalog: Arc<PermissionCatalog>, store: Arc<dyn AssignmentStore>) -> Self {
        Self { catalog, store }
    }

    /// Assigns `role_name` to `target` in `scope`.
    ///
    /// Fails with `NotFound` for an unknown role, `Conflict` when the target
    /// already holds a role in the scope, and `Forbidden` when the actor has
    /// no role in the scope or the role outranks the actor without the actor
    /// holding `admin:all`.
    pub async fn assign_role(
        &self,
        actor: UserId,
        target: UserId,
        role_name: &str,
        scope: Scope,
    ) -> AppResult<RoleAssignment> {
        let role_name = NonEmptyString::new(role_name)?;
        let transaction = self.store.begin().await?;
        lock_slots(&*transaction, scope, [actor, target]).await?;
        let view = PermissionView::new(&self.catalog, &*transaction);

        let role = transaction
            .find_role(role_name.as_str())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("role '{}' was not found", role_name.as_str()))
            })?;

        if let Some(existing) = view.roles_of(target, scope).await?.first() {
            return Err(AppError::Conflict(format!(
                "user '{target}' already holds role '{}' in {scope}",
                existing.name
            )));
        }

        let Some(actor_role) = view.highest_role(actor, scope).await? else {
            return Err(denied(
                actor,
                scope,
                format!("user '{actor}' holds no role in {scope} and cannot assign roles there"),
            ));
        };

        let actor_rank = view.rank_of(Some(&actor_role));
        let target_rank = view.rank_of(Some(&role));
        if target_rank < actor_rank && !view.has(actor, Permission::AdminAll, scope).await? {
            return Err(denied(
                actor,
                scope,
                format!(
                    "user '{actor}' with role '{}' cannot assign higher role '{}'",
                    actor_role.name, role.name
                ),
            ));
        }

        let assignment = transaction
            .insert_role_assignment(target, &role, scope)
            .await?;
        transaction.commit().await?;

        info!(
            actor = %actor,
            target = %target,
            role = %assignment.role_name,
            scope = %scope,
            "role assigned"
        );

        Ok(assignment)
    }

    /// Removes `role_name` from `target` in `scope`.
    ///
    /// Returns whether an assignment was removed. Removal applies no rank
    /// check against the actor; callers gate it with their own requirement.
    pub async fn remove_role(
        &self,
        actor: UserId,
        target: UserId,
        role_name: &str,
        scope: Scope,
    ) -> AppResult<bool> {
        let transaction = self.store.begin().await?;
        lock_slots(&*transaction, scope, [target]).await?;
        let removed = transaction
            .delete_role_assignment(target, role_name.trim(), scope)
            .await?;
        transaction.commit().await?;

        if removed {
            info!(
                actor = %actor,
                target = %target,
                role = role_name.trim(),
                scope = %scope,
                "role removed"
            );
        }

        Ok(removed)
    }

    /// Replaces the direct grants of `target` in a project scope.
    ///
    /// Identifiers are trimmed and blank entries ignored. Unknown identifiers
    /// fail with `Validation`; an actor without `admin:all` may only grant
    /// permissions it currently holds in the scope, otherwise `Forbidden`
    /// names every permission it lacks.
    pub async fn set_direct_permissions<S: AsRef<str>>(
        &self,
        actor: UserId,
        target: UserId,
        scope: Scope,
        requested: &[S],
    ) -> AppResult<DirectPermissionSet> {
        let Some(project_id) = scope.project_id() else {
            return Err(AppError::Validation(
                "direct permission grants require a project scope".to_owned(),
            ));
        };

        let permissions = parse_requested(requested)?;

        let transaction = self.store.begin().await?;
        lock_slots(&*transaction, scope, [actor, target]).await?;
        let view = PermissionView::new(&self.catalog, &*transaction);

        let actor_permissions = view.effective_permissions(actor, scope).await?;
        if !grants(&actor_permissions, Permission::AdminAll) {
            let mut unauthorized: Vec<&str> = permissions
                .iter()
                .filter(|permission| !grants(&actor_permissions, **permission))
                .map(Permission::as_str)
                .collect();
            if !unauthorized.is_empty() {
                unauthorized.sort_unstable();
                return Err(denied(
                    actor,
                    scope,
                    format!("cannot grant permissions: {}", unauthorized.join(", ")),
                ));
            }
        }

        transaction
            .replace_direct_permissions(target, project_id, &permissions)
            .await?;
        transaction.commit().await?;

        info!(
            actor = %actor,
            target = %target,
            scope = %scope,
            count = permissions.len(),
            "direct permissions replaced"
        );

        Ok(DirectPermissionSet {
            user_id: target,
            project_id,
            permissions,
        })
    }
}

/// Locks each distinct user's slot in ascending order so that concurrent
/// guards never wait on each other in a cycle.
pub(crate) async fn lock_slots<const N: usize>(
    transaction: &dyn AssignmentTransaction,
    scope: Scope,
    users: [UserId; N],
) -> AppResult<()> {
    for user_id in BTreeSet::from(users) {
        transaction.lock_slot(user_id, scope).await?;
    }

    Ok(())
}

fn parse_requested<S: AsRef<str>>(requested: &[S]) -> AppResult<BTreeSet<Permission>> {
    let identifiers: BTreeSet<&str> = requested
        .iter()
        .map(|value| value.as_ref().trim())
        .filter(|value| !value.is_empty())
        .collect();

    let mut permissions = BTreeSet::new();
    let mut unknown = Vec::new();
    for identifier in identifiers {
        match Permission::from_transport(identifier) {
            Ok(permission) => {
                permissions.insert(permission);
            }
            Err(_) => unknown.push(identifier),
        }
    }

    if !unknown.is_empty() {
        return Err(AppError::Validation(format!(
            "unknown permissions: {}",
            unknown.join(", ")
        )));
    }

    Ok(permissions)
}

fn denied(actor: UserId, scope: Scope, message: String) -> AppError {
    warn!(actor = %actor, scope = %scope, reason = %message, "assignment denied");
    AppError::Forbidden(message)
}
