use std::env;

use stampgate_core::{AppError, UserId};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct SeederConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub max_connections: u32,
    pub bootstrap_admin_user_id: Option<UserId>,
}

impl SeederConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let database_url = required_non_empty_env("DATABASE_URL")?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(5);

        let bootstrap_admin_user_id = env::var("BOOTSTRAP_ADMIN_USER_ID")
            .ok()
            .map(|value| parse_user_id("BOOTSTRAP_ADMIN_USER_ID", value.as_str()))
            .transpose()?
            .flatten();

        Ok(Self {
            migrate_only,
            database_url,
            max_connections,
            bootstrap_admin_user_id,
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = required_env(name)?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

/// Blank values mean "not configured".
fn parse_user_id(name: &str, value: &str) -> Result<Option<UserId>, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    value
        .parse::<i64>()
        .map(|parsed| Some(UserId::new(parsed)))
        .map_err(|error| AppError::Validation(format!("invalid {name} '{value}': {error}")))
}
