use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use stampgate_application::{
    AssignmentGuard, AssignmentReader, AssignmentStore, PermissionResolver, Seeder,
};
use stampgate_core::{AppError, ProjectId, Scope, UserId};
use stampgate_domain::{Permission, PermissionCatalog};

use super::PostgresAssignmentStore;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

static NEXT_USER_ID: AtomicI64 = AtomicI64::new(0);

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres assignment tests: {error}");
    }

    Some(pool)
}

async fn seeded_store(pool: PgPool) -> (PostgresAssignmentStore, Arc<PermissionCatalog>) {
    let catalog = Arc::new(PermissionCatalog::standard());
    let store = PostgresAssignmentStore::new(pool);
    let seeder = Seeder::new(catalog.clone(), Arc::new(store.clone()));
    assert!(seeder.seed().await.is_ok());
    (store, catalog)
}

async fn waiting_on_advisory_lock(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pg_locks WHERE locktype = 'advisory' AND NOT granted)",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(false)
}

fn fresh_user() -> UserId {
    let base = chrono::Utc::now().timestamp_micros();
    UserId::new(base + NEXT_USER_ID.fetch_add(1, Ordering::Relaxed))
}

fn project(value: i64) -> Scope {
    Scope::Project(ProjectId::new(value))
}

#[tokio::test]
async fn seed_is_idempotent() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, catalog) = seeded_store(pool).await;
    let seeder = Seeder::new(catalog.clone(), Arc::new(store.clone()));
    let again = seeder.seed().await;
    assert!(again.is_ok());
    let again = again.unwrap_or_default();
    assert_eq!(again.permissions_created, 0);
    assert_eq!(again.roles_created, 0);
    assert_eq!(again.links_created, 0);

    let manager = store.find_role("manager").await.unwrap_or_default();
    let permissions: BTreeSet<Permission> = manager
        .map(|role| role.permissions.into_iter().collect())
        .unwrap_or_default();
    let expected: BTreeSet<Permission> = catalog
        .role("manager")
        .map(|template| template.permissions().iter().copied().collect())
        .unwrap_or_default();
    assert_eq!(permissions, expected);
}

#[tokio::test]
async fn unique_indexes_reject_second_role_per_scope() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, _) = seeded_store(pool).await;
    let viewer = store.find_role("viewer").await.unwrap_or_default();
    let viewer = viewer.unwrap_or_else(|| unreachable!());
    let target = fresh_user();

    for scope in [Scope::Global, project(41)] {
        let transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
        let first = transaction
            .insert_role_assignment(target, &viewer, scope)
            .await;
        assert!(first.is_ok(), "{scope}");
        assert!(transaction.commit().await.is_ok());

        let transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
        let second = transaction
            .insert_role_assignment(target, &viewer, scope)
            .await;
        assert!(matches!(second, Err(AppError::Conflict(_))), "{scope}");
    }

    let assignments = store
        .list_role_assignments_for_user(target)
        .await
        .unwrap_or_default();
    let scopes: Vec<Scope> = assignments.iter().map(|assignment| assignment.scope).collect();
    assert_eq!(scopes, vec![Scope::Global, project(41)]);
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, _) = seeded_store(pool).await;
    let uploader = store.find_role("uploader").await.unwrap_or_default();
    let uploader = uploader.unwrap_or_else(|| unreachable!());
    let target = fresh_user();

    {
        let transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
        let inserted = transaction
            .insert_role_assignment(target, &uploader, project(5))
            .await;
        assert!(inserted.is_ok());

        let visible = transaction
            .list_roles_for_user(target, project(5))
            .await
            .unwrap_or_default();
        assert_eq!(visible.len(), 1);
    }

    let after = store
        .list_roles_for_user(target, project(5))
        .await
        .unwrap_or_default();
    assert!(after.is_empty());
}

#[tokio::test]
async fn direct_permissions_replace_per_project() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, _) = seeded_store(pool).await;
    let target = fresh_user();

    for (project_id, permissions) in [
        (7, vec![Permission::DocumentRead, Permission::CompanyRead]),
        (8, vec![Permission::UserInvite]),
        (7, vec![Permission::DocumentUpload]),
    ] {
        let transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
        let replaced = transaction
            .replace_direct_permissions(
                target,
                ProjectId::new(project_id),
                &permissions.into_iter().collect(),
            )
            .await;
        assert!(replaced.is_ok());
        assert!(transaction.commit().await.is_ok());
    }

    let in_seven = store
        .list_direct_permissions(target, ProjectId::new(7))
        .await
        .unwrap_or_default();
    assert_eq!(in_seven, vec![Permission::DocumentUpload]);

    let grants = store
        .list_direct_grants_for_user(target)
        .await
        .unwrap_or_default();
    assert_eq!(grants.len(), 2);
}

#[tokio::test]
async fn guard_and_resolver_run_against_postgres() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, catalog) = seeded_store(pool).await;
    let seeder = Seeder::new(catalog.clone(), Arc::new(store.clone()));
    let guard = AssignmentGuard::new(catalog.clone(), Arc::new(store.clone()));
    let resolver = PermissionResolver::new(catalog, Arc::new(store));

    let admin = fresh_user();
    let manager = fresh_user();
    let viewer = fresh_user();

    assert!(matches!(seeder.bootstrap_admin(admin).await, Ok(true)));
    assert!(matches!(seeder.bootstrap_admin(admin).await, Ok(false)));

    let assigned = guard
        .assign_role(admin, manager, "manager", Scope::Global)
        .await;
    assert!(assigned.is_ok());

    let escalation = guard
        .assign_role(manager, viewer, "admin", Scope::Global)
        .await;
    assert!(matches!(escalation, Err(AppError::Forbidden(_))));

    let lower = guard
        .assign_role(manager, viewer, "viewer", Scope::Global)
        .await;
    assert!(lower.is_ok());

    let duplicate = guard
        .assign_role(manager, viewer, "uploader", Scope::Global)
        .await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    let has_settings = resolver
        .has(admin, Permission::SystemSettings, Scope::Global)
        .await;
    assert!(matches!(has_settings, Ok(true)));

    let highest = resolver.highest_role(manager, Scope::Global).await;
    assert_eq!(
        highest.ok().flatten().map(|role| role.name),
        Some("manager".to_owned())
    );

    let removed = guard
        .remove_role(admin, viewer, "viewer", Scope::Global)
        .await;
    assert!(matches!(removed, Ok(true)));
}

#[tokio::test]
async fn locked_slot_serializes_overlapping_replacements() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, _) = seeded_store(pool.clone()).await;
    let target = fresh_user();
    let project_id = ProjectId::new(61);

    let first = store.begin().await.unwrap_or_else(|_| unreachable!());
    assert!(first.lock_slot(target, Scope::Project(project_id)).await.is_ok());
    let replaced = first
        .replace_direct_permissions(
            target,
            project_id,
            &BTreeSet::from([Permission::DocumentRead]),
        )
        .await;
    assert!(replaced.is_ok());

    let second = store.begin().await.unwrap_or_else(|_| unreachable!());
    let waiting = tokio::spawn(async move {
        second.lock_slot(target, Scope::Project(project_id)).await?;
        second
            .replace_direct_permissions(
                target,
                project_id,
                &BTreeSet::from([Permission::UserInvite]),
            )
            .await?;
        second.commit().await
    });

    while !waiting_on_advisory_lock(&pool).await {
        tokio::task::yield_now().await;
    }
    assert!(!waiting.is_finished());
    assert!(first.commit().await.is_ok());

    let outcome = waiting.await.unwrap_or_else(|_| unreachable!());
    assert!(outcome.is_ok());

    let stored = store
        .list_direct_permissions(target, project_id)
        .await
        .unwrap_or_default();
    assert_eq!(stored, vec![Permission::UserInvite]);
}

#[tokio::test]
async fn concurrent_direct_grants_keep_one_full_set() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, catalog) = seeded_store(pool).await;
    let guard = AssignmentGuard::new(catalog, Arc::new(store.clone()));
    let admin = fresh_user();
    let target = fresh_user();
    let admin_role = store.find_role("admin").await.unwrap_or_default();
    let admin_role = admin_role.unwrap_or_else(|| unreachable!());

    let setup = store.begin().await.unwrap_or_else(|_| unreachable!());
    let inserted = setup
        .insert_role_assignment(admin, &admin_role, project(62))
        .await;
    assert!(inserted.is_ok());
    assert!(setup.commit().await.is_ok());

    let (left, right) = tokio::join!(
        guard.set_direct_permissions(
            admin,
            target,
            project(62),
            &["document:read", "document:download"]
        ),
        guard.set_direct_permissions(admin, target, project(62), &["user:invite"]),
    );
    assert!(left.is_ok() && right.is_ok());

    let stored: BTreeSet<Permission> = store
        .list_direct_permissions(target, ProjectId::new(62))
        .await
        .unwrap_or_default()
        .into_iter()
        .collect();
    let left_set = BTreeSet::from([Permission::DocumentRead, Permission::DocumentDownload]);
    let right_set = BTreeSet::from([Permission::UserInvite]);
    assert!(stored == left_set || stored == right_set, "{stored:?}");
}

#[tokio::test]
async fn concurrent_assignments_admit_one_winner() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, catalog) = seeded_store(pool).await;
    let guard = AssignmentGuard::new(catalog, Arc::new(store.clone()));
    let admin = fresh_user();
    let target = fresh_user();
    let admin_role = store.find_role("admin").await.unwrap_or_default();
    let admin_role = admin_role.unwrap_or_else(|| unreachable!());

    let setup = store.begin().await.unwrap_or_else(|_| unreachable!());
    let inserted = setup
        .insert_role_assignment(admin, &admin_role, project(63))
        .await;
    assert!(inserted.is_ok());
    assert!(setup.commit().await.is_ok());

    let (left, right) = tokio::join!(
        guard.assign_role(admin, target, "viewer", project(63)),
        guard.assign_role(admin, target, "uploader", project(63)),
    );

    let outcomes = [left.is_ok(), right.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(
        matches!(left, Err(AppError::Conflict(_))) || matches!(right, Err(AppError::Conflict(_)))
    );

    let roles = store
        .list_roles_for_user(target, project(63))
        .await
        .unwrap_or_default();
    assert_eq!(roles.len(), 1);
}

#[tokio::test]
async fn list_roles_returns_stored_bundles() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let (store, catalog) = seeded_store(pool).await;
    let roles = store.list_roles().await.unwrap_or_default();

    for template in catalog.roles() {
        let stored = roles.iter().find(|role| role.name == template.name());
        assert!(stored.is_some(), "{}", template.name());
        let permissions: BTreeSet<Permission> = stored
            .map(|role| role.permissions.iter().copied().collect())
            .unwrap_or_default();
        let expected: BTreeSet<Permission> = template.permissions().iter().copied().collect();
        assert_eq!(permissions, expected);
    }

    let names: Vec<&str> = roles.iter().map(|role| role.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
}
