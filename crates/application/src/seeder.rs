use std::sync::Arc;

use tracing::info;

use stampgate_core::{AppError, AppResult, Scope, UserId};
use stampgate_domain::PermissionCatalog;

use crate::assignment_guard::lock_slots;
use crate::{AssignmentStore, PermissionView};

/// Rows inserted by one seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Permission rows created.
    pub permissions_created: usize,
    /// Role rows created.
    pub roles_created: usize,
    /// Role to permission links created.
    pub links_created: usize,
}

/// Materializes the catalog into storage at startup.
#[derive(Clone)]
pub struct Seeder {
    catalog: Arc<PermissionCatalog>,
    store: Arc<dyn AssignmentStore>,
}

impl Seeder {
    /// Creates a seeder from a catalog and a store.
    #[must_use]
    pub fn new(catalog: Arc<PermissionCatalog>, store: Arc<dyn AssignmentStore>) -> Self {
        Self { catalog, store }
    }

    /// Inserts missing permissions, roles and links. Safe to re-run; existing
    /// roles only get their description refreshed and user assignments are
    /// never touched.
    pub async fn seed(&self) -> AppResult<SeedReport> {
        let transaction = self.store.begin().await?;
        let mut report = SeedReport::default();

        for permission in self.catalog.permissions() {
            if transaction.ensure_permission(*permission).await? {
                report.permissions_created += 1;
            }
        }

        for template in self.catalog.roles() {
            let role = transaction
                .ensure_role(template.name(), template.description())
                .await?;
            if role.created {
                report.roles_created += 1;
            }

            for permission in template.permissions() {
                if transaction
                    .ensure_role_permission(role.role_id, *permission)
                    .await?
                {
                    report.links_created += 1;
                }
            }
        }

        transaction.commit().await?;

        info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            links_created = report.links_created,
            "catalog seeded"
        );

        Ok(report)
    }

    /// Gives `user_id` the top hierarchy role in the global scope.
    ///
    /// Returns `false` when the user already holds it. A different global
    /// role is a `Conflict`. This bypasses the assignment guard and is meant
    /// for bootstrap only.
    pub async fn bootstrap_admin(&self, user_id: UserId) -> AppResult<bool> {
        let Some(top_role) = self.catalog.top_role() else {
            return Err(AppError::Validation(
                "role hierarchy is empty; no administrator role to bootstrap".to_owned(),
            ));
        };

        let transaction = self.store.begin().await?;
        lock_slots(&*transaction, Scope::Global, [user_id]).await?;
        let role = transaction.find_role(top_role).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "role '{top_role}' was not found; seed the catalog first"
            ))
        })?;

        let view = PermissionView::new(&self.catalog, &*transaction);
        if let Some(existing) = view.roles_of(user_id, Scope::Global).await?.first() {
            if existing.name == role.name {
                info!(user_id = %user_id, role = %role.name, "administrator already bootstrapped");
                return Ok(false);
            }

            return Err(AppError::Conflict(format!(
                "user '{user_id}' already holds global role '{}'",
                existing.name
            )));
        }

        transaction
            .insert_role_assignment(user_id, &role, Scope::Global)
            .await?;
        transaction.commit().await?;

        info!(user_id = %user_id, role = %role.name, "administrator bootstrapped");
        Ok(true)
    }
}
