use anyhow::Result;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use atlas_crm::errors::AppError;
use atlas_crm::models::role::{insert_role, Role};
use atlas_crm::models::user::{fetch_user, User};
use atlas_crm::permissions::hierarchy;

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

async fn seed_user(pool: &SqlitePool, email: &str, role: &Role) -> Result<User> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, role_ref, level, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind("Test User")
    .bind(email)
    .bind("not-a-real-hash")
    .bind(&role.name)
    .bind(role.id.to_string())
    .bind(role.level)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(fetch_user(pool, id).await?)
}

fn strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

/// director (2) <- manager (3) <- worker (5), built through the public intake.
async fn seed_chain(pool: &SqlitePool) -> Result<(User, User, User)> {
    let director_role = insert_role(pool, "director", 2, &strings(&["users:manage"])).await?;
    let manager_role = insert_role(pool, "manager", 3, &strings(&["users:read"])).await?;
    let staff_role = insert_role(pool, "staff", 5, &strings(&["leads:read"])).await?;

    let director = seed_user(pool, "director@example.com", &director_role).await?;
    let manager = seed_user(pool, "manager@example.com", &manager_role).await?;
    let worker = seed_user(pool, "worker@example.com", &staff_role).await?;

    hierarchy::add_reporting_link(pool, &manager, &director).await?;
    hierarchy::add_reporting_link(pool, &worker, &manager).await?;

    Ok((director, manager, worker))
}

#[tokio::test]
async fn ancestors_are_materialized_on_new_links() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (director, manager, worker) = seed_chain(&pool).await?;

    // The worker's link carries the director as a transitive ancestor, so the
    // director sees both descendants without walking the chain.
    let subs = hierarchy::subordinates_of(&pool, director.id).await?;
    let ids: Vec<Uuid> = subs.iter().map(|s| s.user_id).collect();
    assert_eq!(subs.len(), 2);
    assert!(ids.contains(&manager.id));
    assert!(ids.contains(&worker.id));

    let subs = hierarchy::subordinates_of(&pool, manager.id).await?;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].user_id, worker.id);

    assert!(hierarchy::subordinates_of(&pool, worker.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn removing_a_link_resyncs_descendant_ancestor_lists() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (director, manager, worker) = seed_chain(&pool).await?;

    assert!(hierarchy::remove_reporting_link(&pool, manager.id, director.id).await?);

    // Severing the middle edge must also clear the director from the worker's
    // materialized ancestor list, not just drop the manager's own link.
    assert!(hierarchy::subordinates_of(&pool, director.id).await?.is_empty());

    let subs = hierarchy::subordinates_of(&pool, manager.id).await?;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].user_id, worker.id);

    // Removing an edge that no longer exists is reported, not an error.
    assert!(!hierarchy::remove_reporting_link(&pool, manager.id, director.id).await?);

    // Reattaching the manager propagates the director back down the chain.
    hierarchy::add_reporting_link(&pool, &manager, &director).await?;
    let subs = hierarchy::subordinates_of(&pool, director.id).await?;
    let ids: Vec<Uuid> = subs.iter().map(|s| s.user_id).collect();
    assert!(ids.contains(&manager.id));
    assert!(ids.contains(&worker.id));

    Ok(())
}

#[tokio::test]
async fn level_validator_checks_both_directions() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (_, manager, _) = seed_chain(&pool).await?;

    // Tie with the director above: rejected.
    let err = hierarchy::validate_level_change(&pool, manager.id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RankConflict(_)));

    // Tie with the worker below: rejected.
    let err = hierarchy::validate_level_change(&pool, manager.id, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RankConflict(_)));

    // Strictly between both neighbours: fine.
    hierarchy::validate_level_change(&pool, manager.id, 4).await?;

    Ok(())
}

#[tokio::test]
async fn self_links_rank_inversions_and_cycles_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (director, manager, worker) = seed_chain(&pool).await?;

    let err = hierarchy::add_reporting_link(&pool, &worker, &worker)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // A superior must strictly outrank the user.
    let err = hierarchy::add_reporting_link(&pool, &manager, &worker)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RankConflict(_)));

    // A rank-legal cycle is only reachable after a top-level actor bypasses
    // the validator, leaving the director below their own descendants.
    let superadmin_role = insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;
    let root = seed_user(&pool, "root@example.com", &superadmin_role).await?;
    let demoted_role = insert_role(&pool, "advisor", 9, &strings(&["reports:view"])).await?;
    let director = hierarchy::reassign_role(&pool, &root, &director, &demoted_role).await?;

    // worker (5) now outranks director (9), but worker is still a transitive
    // descendant of director, so the edge would close a cycle.
    let err = hierarchy::add_reporting_link(&pool, &director, &worker)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn duplicate_links_are_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (_, manager, worker) = seed_chain(&pool).await?;

    // INSERT OR IGNORE semantics: re-adding the same edge is a no-op.
    hierarchy::add_reporting_link(&pool, &worker, &manager).await?;

    let superiors = hierarchy::superiors_of(&pool, worker.id).await?;
    assert_eq!(superiors.len(), 1);

    Ok(())
}

#[tokio::test]
async fn reassign_role_updates_denormalized_columns_atomically() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (director, _, worker) = seed_chain(&pool).await?;
    let senior = insert_role(&pool, "senior", 4, &strings(&["leads:read", "leads:create"])).await?;

    let updated = hierarchy::reassign_role(&pool, &director, &worker, &senior).await?;
    assert_eq!(updated.role, "senior");
    assert_eq!(updated.role_ref, senior.id);
    assert_eq!(updated.level, 4);

    Ok(())
}

#[tokio::test]
async fn reassign_role_respects_rank_validator_for_non_top_actors() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let (director, manager, worker) = seed_chain(&pool).await?;

    // Level 3 would tie the worker with their manager.
    let peer_role = insert_role(&pool, "peer", 3, &strings(&["users:read"])).await?;
    let err = hierarchy::reassign_role(&pool, &director, &worker, &peer_role)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RankConflict(_)));

    // A top-level actor bypasses the validator entirely.
    let superadmin_role = insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;
    let root = seed_user(&pool, "root@example.com", &superadmin_role).await?;

    let updated = hierarchy::reassign_role(&pool, &root, &worker, &peer_role).await?;
    assert_eq!(updated.level, 3);

    // The stale link survives until the next level cascade prunes it.
    assert!(hierarchy::superiors_of(&pool, updated.id)
        .await?
        .iter()
        .any(|s| s.user_id == manager.id));

    Ok(())
}

#[tokio::test]
async fn oversight_link_is_inserted_once() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(&dir).await?;

    let superadmin_role = insert_role(&pool, "superadmin", 1, &strings(&["users:manage"])).await?;
    let staff_role = insert_role(&pool, "staff", 5, &strings(&["leads:read"])).await?;

    let root = seed_user(&pool, "root@example.com", &superadmin_role).await?;
    let worker = seed_user(&pool, "worker@example.com", &staff_role).await?;

    assert!(hierarchy::ensure_superadmin_oversight(&pool, worker.id, root.id).await?);
    assert!(!hierarchy::ensure_superadmin_oversight(&pool, worker.id, root.id).await?);
    assert!(!hierarchy::ensure_superadmin_oversight(&pool, root.id, root.id).await?);

    let superiors = hierarchy::superiors_of(&pool, worker.id).await?;
    assert_eq!(superiors.len(), 1);
    assert_eq!(superiors[0].user_id, root.id);

    Ok(())
}
