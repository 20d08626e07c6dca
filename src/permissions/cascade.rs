//! Role-mutation propagation.
//!
//! A role edit fans out to every user referencing the role. The fan-out is
//! per-user and not transactional across users: a single user failure is
//! logged and the batch continues, and re-running the cascade from the same
//! inputs is idempotent, so a crashed cascade can simply be re-executed.

use std::collections::HashSet;

use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::role::{fetch_role, Role};
use crate::models::user::{users_with_role, User};
use crate::models::{parse_uuid, to_json_list};
use crate::permissions::cache::RoleCache;
use crate::permissions::hierarchy::{ensure_superadmin_oversight, prune_conflicting_links};
use crate::permissions::resolver::effective_from;
use crate::permissions::{
    normalize_token_list, sorted_tokens, validate_level, SUPERADMIN_LEVEL, SUPERADMIN_ROLE,
};

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CascadeReport {
    pub users_updated: u64,
    pub users_failed: u64,
    pub links_removed: u64,
    pub links_added: u64,
}

/// Change a role's level and propagate the new level to every user on the
/// role: denormalized `level` copies are rewritten, reporting links the new
/// level invalidates are pruned (logged, never blocking), and users below the
/// top level gain a superadmin oversight link if they lack one.
pub async fn cascade_level_change(
    pool: &SqlitePool,
    cache: &RoleCache,
    role: &Role,
    new_level: i64,
) -> AppResult<(Role, CascadeReport)> {
    validate_level(new_level)?;

    if role.is_superadmin() && new_level != SUPERADMIN_LEVEL {
        return Err(AppError::forbidden_operation(
            "the superadmin role is fixed at level 1",
        ));
    }

    let users = users_with_role(pool, role.id).await?;

    sqlx::query("UPDATE roles SET level = ?, updated_at = ? WHERE id = ?")
        .bind(new_level)
        .bind(crate::utils::utc_now())
        .bind(role.id.to_string())
        .execute(pool)
        .await?;
    cache.invalidate(&role.name).await;

    let superadmin_id = oldest_superadmin_user(pool).await?;
    if superadmin_id.is_none() {
        tracing::warn!(role = %role.name, "no superadmin user exists; oversight links skipped");
    }

    let mut report = CascadeReport::default();

    for user in &users {
        match apply_level_to_user(pool, user, new_level, superadmin_id).await {
            Ok((removed, added)) => {
                report.users_updated += 1;
                report.links_removed += removed;
                report.links_added += added;
            }
            Err(err) => {
                report.users_failed += 1;
                tracing::warn!(
                    user_id = %user.id,
                    role = %role.name,
                    error = %err,
                    "level cascade failed for user; continuing"
                );
            }
        }
    }

    let role = fetch_role(pool, role.id).await?;
    Ok((role, report))
}

async fn apply_level_to_user(
    pool: &SqlitePool,
    user: &User,
    new_level: i64,
    superadmin_id: Option<Uuid>,
) -> AppResult<(u64, u64)> {
    sqlx::query("UPDATE users SET level = ?, updated_at = ? WHERE id = ?")
        .bind(new_level)
        .bind(crate::utils::utc_now())
        .bind(user.id.to_string())
        .execute(pool)
        .await?;

    let removed = prune_conflicting_links(pool, user.id, new_level).await?;

    let mut added = 0u64;
    if new_level > SUPERADMIN_LEVEL {
        if let Some(superadmin_id) = superadmin_id {
            if ensure_superadmin_oversight(pool, user.id, superadmin_id).await? {
                added += 1;
            }
        }
    }

    Ok((removed, added))
}

/// Change a role's permission set and rebase every affected user's overrides
/// so their effective permissions are preserved. Each user's effective set is
/// captured BEFORE the role write; afterwards the minimal diff is recomputed
/// against the new role set: `allowed' = effective \ new`, `denied' = new \
/// effective`.
pub async fn cascade_permission_change(
    pool: &SqlitePool,
    cache: &RoleCache,
    role: &Role,
    new_permissions: &[String],
) -> AppResult<(Role, CascadeReport)> {
    let new_permissions = normalize_token_list(new_permissions);
    let new_set: HashSet<String> = new_permissions.iter().cloned().collect();

    let users = users_with_role(pool, role.id).await?;
    let old_base = role.permission_set();

    // Effective sets anchored to the role state prior to the write. Superadmin
    // users are excluded: their overrides must stay empty so that edits to the
    // superadmin role's permission list flow straight through (per-user
    // override edits are rejected for them, so a rebased denial could never be
    // cleared).
    let snapshots: Vec<(Uuid, HashSet<String>)> = users
        .iter()
        .filter(|user| !user.has_superadmin_role())
        .map(|user| (user.id, effective_from(&old_base, user)))
        .collect();

    sqlx::query("UPDATE roles SET permissions = ?, updated_at = ? WHERE id = ?")
        .bind(to_json_list(&new_permissions))
        .bind(crate::utils::utc_now())
        .bind(role.id.to_string())
        .execute(pool)
        .await?;
    cache.invalidate(&role.name).await;

    let mut report = CascadeReport::default();

    for (user_id, current_effective) in &snapshots {
        let allowed: HashSet<String> = current_effective.difference(&new_set).cloned().collect();
        let denied: HashSet<String> = new_set.difference(current_effective).cloned().collect();

        let result =
            crate::models::user::update_custom_permissions(pool, *user_id, &sorted_tokens(&allowed), &sorted_tokens(&denied))
                .await;

        match result {
            Ok(()) => report.users_updated += 1,
            Err(err) => {
                report.users_failed += 1;
                tracing::warn!(
                    user_id = %user_id,
                    role = %role.name,
                    error = %err,
                    "permission cascade failed for user; continuing"
                );
            }
        }
    }

    let role = fetch_role(pool, role.id).await?;
    Ok((role, report))
}

/// Rename a role and resync the denormalized `role` name on its users. The
/// superadmin role cannot be renamed.
pub async fn cascade_rename(
    pool: &SqlitePool,
    cache: &RoleCache,
    role: &Role,
    new_name: &str,
) -> AppResult<Role> {
    if role.is_superadmin() {
        return Err(AppError::forbidden_operation("the superadmin role cannot be renamed"));
    }

    let new_name = new_name.trim().to_lowercase();
    if new_name.is_empty() {
        return Err(AppError::validation("role name must not be empty"));
    }
    if new_name == SUPERADMIN_ROLE {
        return Err(AppError::conflict("role name is reserved"));
    }

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ? AND id != ?")
        .bind(&new_name)
        .bind(role.id.to_string())
        .fetch_one(pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("role name already in use"));
    }

    sqlx::query("UPDATE roles SET name = ?, updated_at = ? WHERE id = ?")
        .bind(&new_name)
        .bind(crate::utils::utc_now())
        .bind(role.id.to_string())
        .execute(pool)
        .await?;

    sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE role_ref = ?")
        .bind(&new_name)
        .bind(crate::utils::utc_now())
        .bind(role.id.to_string())
        .execute(pool)
        .await?;

    cache.invalidate(&role.name).await;
    cache.invalidate(&new_name).await;

    fetch_role(pool, role.id).await
}

/// The designated oversight superadmin: the oldest active superadmin-role
/// user, if any.
pub async fn oldest_superadmin_user(pool: &SqlitePool) -> AppResult<Option<Uuid>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM users WHERE role = ? AND is_active = 1 AND deleted_at IS NULL ORDER BY created_at LIMIT 1",
    )
    .bind(SUPERADMIN_ROLE)
    .fetch_optional(pool)
    .await?;

    id.as_deref().map(|id| parse_uuid(id, "user")).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_preserves_effective_set() {
        // A user whose effective set is {leads:read, leads:delete} keeps
        // exactly that set when the role gains leads:create.
        let current: HashSet<String> =
            ["leads:read", "leads:delete"].iter().map(|t| t.to_string()).collect();
        let new_role: HashSet<String> =
            ["leads:read", "leads:create"].iter().map(|t| t.to_string()).collect();

        let allowed: HashSet<String> = current.difference(&new_role).cloned().collect();
        let denied: HashSet<String> = new_role.difference(&current).cloned().collect();

        let rebased: HashSet<String> = new_role
            .union(&allowed)
            .filter(|t| !denied.contains(*t))
            .cloned()
            .collect();

        assert_eq!(rebased, current);
    }
}
