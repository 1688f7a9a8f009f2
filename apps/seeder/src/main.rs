//! Stampgate seeder: applies migrations, seeds the permission catalog and
//! optionally bootstraps the first administrator.

#![forbid(unsafe_code)]

mod seeder_config;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use stampgate_application::Seeder;
use stampgate_core::AppError;
use stampgate_domain::PermissionCatalog;
use stampgate_infrastructure::PostgresAssignmentStore;
use tracing::info;

use crate::seeder_config::{SeederConfig, init_tracing};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SeederConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    if config.migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let catalog = Arc::new(PermissionCatalog::standard());
    let store = Arc::new(PostgresAssignmentStore::new(pool));
    let seeder = Seeder::new(catalog, store);

    seeder.seed().await?;

    if let Some(user_id) = config.bootstrap_admin_user_id {
        seeder.bootstrap_admin(user_id).await?;
    } else {
        info!("BOOTSTRAP_ADMIN_USER_ID not set; skipping administrator bootstrap");
    }

    Ok(())
}
