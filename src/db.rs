use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::errors::AppResult;
use crate::models::role::{fetch_role_by_name, insert_role};
use crate::permissions::{all_tokens, member_tokens, SUPERADMIN_LEVEL, SUPERADMIN_ROLE};

pub const DEFAULT_ROLE: &str = "member";
const DEFAULT_ROLE_LEVEL: i64 = 5;

pub async fn init() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

/// Seed the built-in roles. `superadmin` carries the full token catalog at
/// level 1; `member` is the default role for new registrations.
pub async fn bootstrap_roles(pool: &SqlitePool) -> AppResult<()> {
    if fetch_role_by_name(pool, SUPERADMIN_ROLE).await?.is_none() {
        insert_role(pool, SUPERADMIN_ROLE, SUPERADMIN_LEVEL, &all_tokens()).await?;
        tracing::info!(role = SUPERADMIN_ROLE, "seeded built-in role");
    }

    if fetch_role_by_name(pool, DEFAULT_ROLE).await?.is_none() {
        insert_role(pool, DEFAULT_ROLE, DEFAULT_ROLE_LEVEL, &member_tokens()).await?;
        tracing::info!(role = DEFAULT_ROLE, "seeded built-in role");
    }

    Ok(())
}
