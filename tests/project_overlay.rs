use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use atlas_crm::errors::AppError;
use atlas_crm::models::project_permission::{
    deactivate_overlay, upsert_overlay, ProjectPermissionOverrides, ProjectRestrictions,
};
use atlas_crm::models::role::{insert_role, Role};
use atlas_crm::models::user::{fetch_user, User};
use atlas_crm::permissions::cache::RoleCache;
use atlas_crm::permissions::resolver;

async fn setup_pool(dir: &TempDir) -> Result<SqlitePool> {
    let db_path = dir.path().join("test.db");

    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    Ok(pool)
}

async fn seed_user(
    pool: &SqlitePool,
    email: &str,
    role: &Role,
    denied: &[&str],
) -> Result<User> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, role_ref, level, custom_denied, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind("Test User")
    .bind(email)
    .bind("not-a-real-hash")
    .bind(&role.name)
    .bind(role.id.to_string())
    .bind(role.level)
    .bind(serde_json::to_string(denied)?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(fetch_user(pool, id).await?)
}

async fn seed_project(pool: &SqlitePool, owner_id: Uuid) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    sqlx::query(
        "INSERT INTO projects (id, name, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind("Test Project")
    .bind(owner_id.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

fn strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn overrides(allowed: &[&str], denied: &[&str]) -> ProjectPermissionOverrides {
    ProjectPermissionOverrides {
        allowed: strings(allowed),
        denied: strings(denied),
    }
}

#[tokio::test]
async fn overlay_refines_the_global_set() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let role = insert_role(&pool, "sales", 5, &strings(&["leads:read", "leads:create"])).await?;
    let user = seed_user(&pool, "s@example.com", &role, &[]).await?;
    let project_id = seed_project(&pool, user.id).await?;

    upsert_overlay(
        &pool,
        user.id,
        project_id,
        &overrides(&["reports:export"], &["leads:create"]),
        &ProjectRestrictions::default(),
        None,
    )
    .await?;

    let set = resolver::effective_project_permissions(&pool, &cache, &user, project_id).await?;
    assert!(set.permissions.contains(&"leads:read".to_string()));
    assert!(set.permissions.contains(&"reports:export".to_string()));
    assert!(!set.permissions.contains(&"leads:create".to_string()));

    Ok(())
}

#[tokio::test]
async fn project_denial_beats_global_grant_and_overlay_allow() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let role = insert_role(&pool, "sales", 5, &strings(&["leads:read"])).await?;
    let user = seed_user(&pool, "s@example.com", &role, &[]).await?;
    let project_id = seed_project(&pool, user.id).await?;

    // Same token on both sides of the overlay: denial wins.
    upsert_overlay(
        &pool,
        user.id,
        project_id,
        &overrides(&["leads:read"], &["leads:read"]),
        &ProjectRestrictions::default(),
        None,
    )
    .await?;

    let set = resolver::effective_project_permissions(&pool, &cache, &user, project_id).await?;
    assert!(!set.permissions.contains(&"leads:read".to_string()));

    Ok(())
}

#[tokio::test]
async fn overlay_cannot_resurrect_a_user_level_denial_elsewhere() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let role = insert_role(&pool, "sales", 5, &strings(&["leads:read", "leads:create"])).await?;
    let user = seed_user(&pool, "s@example.com", &role, &["leads:create"]).await?;
    let project_a = seed_project(&pool, user.id).await?;
    let project_b = seed_project(&pool, user.id).await?;

    // Project A grants it back; project B inherits the global denial.
    upsert_overlay(
        &pool,
        user.id,
        project_a,
        &overrides(&["leads:create"], &[]),
        &ProjectRestrictions::default(),
        None,
    )
    .await?;

    let in_a = resolver::effective_project_permissions(&pool, &cache, &user, project_a).await?;
    assert!(in_a.permissions.contains(&"leads:create".to_string()));

    let in_b = resolver::effective_project_permissions(&pool, &cache, &user, project_b).await?;
    assert!(!in_b.permissions.contains(&"leads:create".to_string()));

    Ok(())
}

#[tokio::test]
async fn expired_or_inactive_overlays_fall_back_to_global() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let role = insert_role(&pool, "sales", 5, &strings(&["leads:read"])).await?;
    let user = seed_user(&pool, "s@example.com", &role, &[]).await?;
    let project_id = seed_project(&pool, user.id).await?;

    upsert_overlay(
        &pool,
        user.id,
        project_id,
        &overrides(&[], &["leads:read"]),
        &ProjectRestrictions::default(),
        Some(Utc::now() - Duration::hours(1)),
    )
    .await?;

    // Expired: the denial no longer applies and defaults come back.
    let set = resolver::effective_project_permissions(&pool, &cache, &user, project_id).await?;
    assert!(set.permissions.contains(&"leads:read".to_string()));
    assert_eq!(set.restrictions, ProjectRestrictions::default());

    // Refresh it into the future, then deactivate: same fallback.
    upsert_overlay(
        &pool,
        user.id,
        project_id,
        &overrides(&[], &["leads:read"]),
        &ProjectRestrictions::default(),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await?;
    let set = resolver::effective_project_permissions(&pool, &cache, &user, project_id).await?;
    assert!(!set.permissions.contains(&"leads:read".to_string()));

    deactivate_overlay(&pool, user.id, project_id).await?;
    let set = resolver::effective_project_permissions(&pool, &cache, &user, project_id).await?;
    assert!(set.permissions.contains(&"leads:read".to_string()));

    Ok(())
}

#[tokio::test]
async fn upsert_replaces_and_reactivates_the_overlay() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let role = insert_role(&pool, "sales", 5, &strings(&["leads:read"])).await?;
    let user = seed_user(&pool, "s@example.com", &role, &[]).await?;
    let project_id = seed_project(&pool, user.id).await?;

    upsert_overlay(
        &pool,
        user.id,
        project_id,
        &overrides(&[], &["leads:read"]),
        &ProjectRestrictions::default(),
        None,
    )
    .await?;
    deactivate_overlay(&pool, user.id, project_id).await?;

    // A fresh upsert reactivates the row with the new content.
    let restrictions = ProjectRestrictions {
        can_export_data: true,
        ..ProjectRestrictions::default()
    };
    let overlay = upsert_overlay(
        &pool,
        user.id,
        project_id,
        &overrides(&["reports:export"], &[]),
        &restrictions,
        None,
    )
    .await?;
    assert!(overlay.is_active);

    let set = resolver::effective_project_permissions(&pool, &cache, &user, project_id).await?;
    assert!(set.permissions.contains(&"leads:read".to_string()));
    assert!(set.permissions.contains(&"reports:export".to_string()));
    assert!(set.restrictions.can_export_data);
    assert!(!set.restrictions.can_delete_leads);

    Ok(())
}

#[tokio::test]
async fn deactivating_a_missing_overlay_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let err = deactivate_overlay(&pool, Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    Ok(())
}
