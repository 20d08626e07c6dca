use std::collections::HashSet;

use anyhow::Result;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use atlas_crm::errors::AppError;
use atlas_crm::models::role::{fetch_role, insert_role, Role};
use atlas_crm::models::user::{fetch_user, User};
use atlas_crm::permissions::cache::RoleCache;
use atlas_crm::permissions::{cascade, hierarchy, resolver};

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
    allowed: &[&str],
    denied: &[&str],
) -> Result<User> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, role_ref, level, custom_allowed, custom_denied, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind("Test User")
    .bind(email)
    .bind("not-a-real-hash")
    .bind(&role.name)
    .bind(role.id.to_string())
    .bind(role.level)
    .bind(serde_json::to_string(allowed)?)
    .bind(serde_json::to_string(denied)?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(fetch_user(pool, id).await?)
}

fn strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn level_cascade_rewrites_users_and_prunes_links() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let superadmin = insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;
    let manager = insert_role(&pool, "manager", 3, &strings(&["users:read"])).await?;
    let staff = insert_role(&pool, "staff", 5, &strings(&["leads:read"])).await?;

    let root = seed_user(&pool, "root@example.com", &superadmin, &[], &[]).await?;
    let boss = seed_user(&pool, "boss@example.com", &manager, &[], &[]).await?;
    let worker = seed_user(&pool, "worker@example.com", &staff, &[], &[]).await?;

    hierarchy::add_reporting_link(&pool, &worker, &boss).await?;

    // Raising staff from level 5 to level 2 outranks the level-3 boss, so the
    // worker->boss link must be pruned rather than blocking the change.
    let (role, report) = cascade::cascade_level_change(&pool, &cache, &staff, 2).await?;
    assert_eq!(role.level, 2);

    assert_eq!(report.users_updated, 1);
    assert_eq!(report.users_failed, 0);
    assert_eq!(report.links_removed, 1);
    // The worker lost their only superior; oversight reattaches them to root.
    assert_eq!(report.links_added, 1);

    let worker = fetch_user(&pool, worker.id).await?;
    assert_eq!(worker.level, 2);

    let superiors = hierarchy::superiors_of(&pool, worker.id).await?;
    assert_eq!(superiors.len(), 1);
    assert_eq!(superiors[0].user_id, root.id);

    Ok(())
}

#[tokio::test]
async fn level_cascade_keeps_valid_links() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;
    let manager = insert_role(&pool, "manager", 3, &strings(&["users:read"])).await?;
    let staff = insert_role(&pool, "staff", 6, &strings(&["leads:read"])).await?;

    let boss = seed_user(&pool, "boss@example.com", &manager, &[], &[]).await?;
    let worker = seed_user(&pool, "worker@example.com", &staff, &[], &[]).await?;

    hierarchy::add_reporting_link(&pool, &worker, &boss).await?;

    // Level 6 -> 5 still sits below the level-3 boss; nothing to prune.
    let (_, report) = cascade::cascade_level_change(&pool, &cache, &staff, 5).await?;
    assert_eq!(report.links_removed, 0);
    assert!(hierarchy::superiors_of(&pool, worker.id)
        .await?
        .iter()
        .any(|s| s.user_id == boss.id));

    Ok(())
}

#[tokio::test]
async fn superadmin_level_is_immutable() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let superadmin = insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;

    let err = cascade::cascade_level_change(&pool, &cache, &superadmin, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenOperation(_)));

    let err = cascade::cascade_level_change(&pool, &cache, &superadmin, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn permission_cascade_preserves_each_users_effective_set() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let sales = insert_role(&pool, "sales", 5, &strings(&["leads:read", "leads:create"])).await?;

    // Three users with distinct override shapes against the same role.
    let plain = seed_user(&pool, "plain@example.com", &sales, &[], &[]).await?;
    let extended =
        seed_user(&pool, "ext@example.com", &sales, &["reports:view"], &[]).await?;
    let restricted =
        seed_user(&pool, "res@example.com", &sales, &[], &["leads:create"]).await?;

    let mut before: Vec<(Uuid, HashSet<String>)> = Vec::new();
    for user in [&plain, &extended, &restricted] {
        before.push((
            user.id,
            resolver::effective_permissions(&pool, &cache, user).await?,
        ));
    }

    let (role, report) = cascade::cascade_permission_change(
        &pool,
        &cache,
        &sales,
        &strings(&["leads:read", "leads:delete", "users:read"]),
    )
    .await?;
    assert_eq!(report.users_updated, 3);
    assert_eq!(report.users_failed, 0);
    assert_eq!(
        role.permissions,
        vec!["leads:delete", "leads:read", "users:read"]
    );

    for (user_id, expected) in before {
        let user = fetch_user(&pool, user_id).await?;
        let after = resolver::effective_permissions(&pool, &cache, &user).await?;
        assert_eq!(after, expected, "effective set drifted for {user_id}");
    }

    Ok(())
}

#[tokio::test]
async fn permission_cascade_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let sales = insert_role(&pool, "sales", 5, &strings(&["leads:read"])).await?;
    let user = seed_user(&pool, "s@example.com", &sales, &["reports:view"], &[]).await?;

    let new_tokens = strings(&["leads:read", "leads:create"]);
    let (role, _) = cascade::cascade_permission_change(&pool, &cache, &sales, &new_tokens).await?;

    let first = fetch_user(&pool, user.id).await?;

    // Re-running against the already-updated role must not change anything.
    cascade::cascade_permission_change(&pool, &cache, &role, &new_tokens).await?;
    let second = fetch_user(&pool, user.id).await?;

    assert_eq!(first.custom_permissions.allowed, second.custom_permissions.allowed);
    assert_eq!(first.custom_permissions.denied, second.custom_permissions.denied);

    let effective = resolver::effective_permissions(&pool, &cache, &second).await?;
    assert!(effective.contains("leads:read"));
    assert!(effective.contains("reports:view"));
    assert!(!effective.contains("leads:create"));

    Ok(())
}

#[tokio::test]
async fn superadmin_role_edits_flow_through_without_rebasing() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let superadmin = insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;
    let root = seed_user(&pool, "root@example.com", &superadmin, &[], &[]).await?;

    // Editing the superadmin role is the one sanctioned way to change a
    // superadmin's base permissions; the rebase must not pin the old set.
    cascade::cascade_permission_change(
        &pool,
        &cache,
        &superadmin,
        &strings(&["users:manage", "reports:export"]),
    )
    .await?;

    let root = fetch_user(&pool, root.id).await?;
    assert!(root.custom_permissions.allowed.is_empty());
    assert!(root.custom_permissions.denied.is_empty());

    let effective = resolver::effective_permissions(&pool, &cache, &root).await?;
    assert!(effective.contains("users:manage"));
    assert!(effective.contains("reports:export"));

    // And removal works the same way.
    let role = fetch_role(&pool, superadmin.id).await?;
    cascade::cascade_permission_change(&pool, &cache, &role, &strings(&["users:manage"])).await?;

    let root = fetch_user(&pool, root.id).await?;
    assert!(root.custom_permissions.denied.is_empty());
    let effective = resolver::effective_permissions(&pool, &cache, &root).await?;
    assert!(!effective.contains("reports:export"));

    Ok(())
}

#[tokio::test]
async fn rename_cascade_resyncs_denormalized_names() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let sales = insert_role(&pool, "sales", 5, &strings(&["leads:read"])).await?;
    let user = seed_user(&pool, "s@example.com", &sales, &[], &[]).await?;

    let renamed = cascade::cascade_rename(&pool, &cache, &sales, " Field-Sales ").await?;
    assert_eq!(renamed.name, "field-sales");

    let user = fetch_user(&pool, user.id).await?;
    assert_eq!(user.role, "field-sales");
    assert_eq!(user.role_ref, renamed.id);

    // Resolution keeps working through the renamed role.
    assert!(resolver::has_permission(&pool, &cache, &user, "leads:read").await?);

    let err = cascade::cascade_rename(&pool, &cache, &renamed, "superadmin")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn level_cascade_without_superadmin_skips_oversight() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;
    let cache = RoleCache::new();

    let staff = insert_role(&pool, "staff", 5, &strings(&["leads:read"])).await?;
    let worker = seed_user(&pool, "worker@example.com", &staff, &[], &[]).await?;

    let (_, report) = cascade::cascade_level_change(&pool, &cache, &staff, 4).await?;
    assert_eq!(report.users_updated, 1);
    assert_eq!(report.links_added, 0);

    let role = fetch_role(&pool, staff.id).await?;
    assert_eq!(role.level, 4);
    assert_eq!(fetch_user(&pool, worker.id).await?.level, 4);

    Ok(())
}
