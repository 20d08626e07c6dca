//! Reporting-hierarchy queries and the rank validator.
//!
//! Invariant: a user's numeric level is strictly greater than every superior's
//! and strictly less than every subordinate's (smaller number = higher rank).
//! Descendants are found by exact id membership in the materialized ancestor
//! lists, via `json_each`.

use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::parse_uuid;
use crate::models::reporting;
use crate::models::role::Role;
use crate::models::user::{fetch_user, User};
use crate::permissions::SUPERADMIN_LEVEL;

#[derive(Debug, Clone)]
pub struct ReportingPeer {
    pub user_id: Uuid,
    pub level: i64,
}

#[derive(Debug, FromRow)]
struct PeerRow {
    id: String,
    level: i64,
}

impl TryFrom<PeerRow> for ReportingPeer {
    type Error = AppError;

    fn try_from(value: PeerRow) -> Result<Self, Self::Error> {
        Ok(ReportingPeer {
            user_id: parse_uuid(&value.id, "user")?,
            level: value.level,
        })
    }
}

pub async fn superiors_of(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<ReportingPeer>> {
    let rows = sqlx::query_as::<_, PeerRow>(
        "SELECT u.id AS id, u.level AS level \
         FROM reporting_links rl \
         JOIN users u ON u.id = rl.superior_id \
         WHERE rl.user_id = ? AND u.deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ReportingPeer::try_from).collect()
}

/// Direct reports plus transitive descendants (links whose ancestor list
/// contains this user).
pub async fn subordinates_of(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<ReportingPeer>> {
    let rows = sqlx::query_as::<_, PeerRow>(
        "SELECT DISTINCT u.id AS id, u.level AS level \
         FROM reporting_links rl \
         JOIN users u ON u.id = rl.user_id \
         WHERE u.deleted_at IS NULL AND (rl.superior_id = ?1 \
            OR EXISTS (SELECT 1 FROM json_each(rl.ancestors) je WHERE je.value = ?1))",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ReportingPeer::try_from).collect()
}

/// Reject a proposed level that would tie or outrank a superior, or no longer
/// outrank a subordinate.
pub async fn validate_level_change(
    pool: &SqlitePool,
    user_id: Uuid,
    proposed_level: i64,
) -> AppResult<()> {
    for superior in superiors_of(pool, user_id).await? {
        if superior.level >= proposed_level {
            return Err(AppError::rank_conflict(format!(
                "proposed level {proposed_level} would tie or outrank superior {} at level {}",
                superior.user_id, superior.level
            )));
        }
    }

    for subordinate in subordinates_of(pool, user_id).await? {
        if subordinate.level <= proposed_level {
            return Err(AppError::rank_conflict(format!(
                "proposed level {proposed_level} would no longer outrank subordinate {} at level {}",
                subordinate.user_id, subordinate.level
            )));
        }
    }

    Ok(())
}

/// Remove reporting links that the user's new level invalidates. Used by the
/// level cascade, which prefers dropping a link over blocking the role change.
/// Returns the number of removed links.
pub async fn prune_conflicting_links(
    pool: &SqlitePool,
    user_id: Uuid,
    new_level: i64,
) -> AppResult<u64> {
    let mut removed = 0u64;
    let mut resync: Vec<Uuid> = Vec::new();

    for superior in superiors_of(pool, user_id).await? {
        if superior.level >= new_level {
            if reporting::delete_link(pool, user_id, superior.user_id).await? {
                tracing::warn!(
                    user_id = %user_id,
                    superior_id = %superior.user_id,
                    new_level,
                    superior_level = superior.level,
                    "removed reporting link invalidated by level change"
                );
                removed += 1;
            }
        }
    }

    for subordinate in subordinates_of(pool, user_id).await? {
        if subordinate.level <= new_level {
            // Drops the subordinate's direct link to this user and any link
            // carrying this user in its ancestor list.
            let result = sqlx::query(
                "DELETE FROM reporting_links WHERE user_id = ?1 AND (superior_id = ?2 \
                    OR EXISTS (SELECT 1 FROM json_each(reporting_links.ancestors) je WHERE je.value = ?2))",
            )
            .bind(subordinate.user_id.to_string())
            .bind(user_id.to_string())
            .execute(pool)
            .await?;

            if result.rows_affected() > 0 {
                tracing::warn!(
                    user_id = %subordinate.user_id,
                    superior_id = %user_id,
                    new_level,
                    subordinate_level = subordinate.level,
                    "removed reporting link invalidated by level change"
                );
                removed += result.rows_affected();
                resync.push(subordinate.user_id);
            }
        }
    }

    if removed > 0 {
        rebuild_descendant_ancestors(pool, user_id).await?;
        for user in resync {
            rebuild_descendant_ancestors(pool, user).await?;
        }
    }

    Ok(removed)
}

/// Intake for a new reporting edge. Validates rank ordering and rejects
/// self-links and cycles, then materializes the superior's ancestor set onto
/// the link (order is not significant; membership is).
pub async fn add_reporting_link(
    pool: &SqlitePool,
    user: &User,
    superior: &User,
) -> AppResult<()> {
    if user.id == superior.id {
        return Err(AppError::validation("a user cannot report to themselves"));
    }

    if superior.level >= user.level {
        return Err(AppError::rank_conflict(format!(
            "superior level {} does not outrank user level {}",
            superior.level, user.level
        )));
    }

    let descendants = subordinates_of(pool, user.id).await?;
    if descendants.iter().any(|d| d.user_id == superior.id) {
        return Err(AppError::conflict("reporting cycle detected"));
    }

    let ancestors = materialized_ancestors(pool, superior.id).await?;
    reporting::insert_link(pool, user.id, superior.id, &ancestors).await?;
    rebuild_descendant_ancestors(pool, user.id).await?;

    Ok(())
}

/// The union of a user's own superiors and their stored ancestors, deduplicated.
/// This is what gets materialized onto the links of the user's direct reports.
async fn materialized_ancestors(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<Uuid>> {
    let mut ancestors: Vec<Uuid> = Vec::new();
    for link in reporting::links_of(pool, user_id).await? {
        for ancestor in link.ancestors {
            if !ancestors.contains(&ancestor) {
                ancestors.push(ancestor);
            }
        }
        if !ancestors.contains(&link.superior_id) {
            ancestors.push(link.superior_id);
        }
    }
    Ok(ancestors)
}

/// Recompute the stored ancestor lists for every link in `user_id`'s subtree.
/// Run after any structural change above the subtree (link insert or removal,
/// pruning) so descendant lookups never report severed edges.
pub async fn rebuild_descendant_ancestors(pool: &SqlitePool, user_id: Uuid) -> AppResult<()> {
    let mut queue = vec![user_id];
    let mut visited: Vec<Uuid> = Vec::new();

    while let Some(current) = queue.pop() {
        if visited.contains(&current) {
            continue;
        }
        visited.push(current);

        let ancestors = materialized_ancestors(pool, current).await?;
        sqlx::query("UPDATE reporting_links SET ancestors = ? WHERE superior_id = ?")
            .bind(crate::models::to_json_uuid_list(&ancestors))
            .bind(current.to_string())
            .execute(pool)
            .await?;

        let reports: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM reporting_links WHERE superior_id = ?")
                .bind(current.to_string())
                .fetch_all(pool)
                .await?;
        for report in &reports {
            queue.push(parse_uuid(report, "user")?);
        }
    }

    Ok(())
}

/// Remove one reporting edge and resync the subtree's ancestor lists. Returns
/// false when the edge did not exist.
pub async fn remove_reporting_link(
    pool: &SqlitePool,
    user_id: Uuid,
    superior_id: Uuid,
) -> AppResult<bool> {
    if !reporting::delete_link(pool, user_id, superior_id).await? {
        return Ok(false);
    }

    rebuild_descendant_ancestors(pool, user_id).await?;
    Ok(true)
}

/// Guarantee a superadmin oversight link for a user below the top level.
/// Returns true if a link was inserted.
pub async fn ensure_superadmin_oversight(
    pool: &SqlitePool,
    user_id: Uuid,
    superadmin_id: Uuid,
) -> AppResult<bool> {
    if user_id == superadmin_id {
        return Ok(false);
    }
    if reporting::link_exists(pool, user_id, superadmin_id).await? {
        return Ok(false);
    }

    reporting::insert_link(pool, user_id, superadmin_id, &[]).await?;
    Ok(true)
}

/// The single mutation entry point for a user's role: sets the denormalized
/// `role` name, `role_ref` and `level` together so they cannot drift. The
/// hierarchy validator runs unless the acting administrator is top-level.
pub async fn reassign_role(
    pool: &SqlitePool,
    actor: &User,
    user: &User,
    role: &Role,
) -> AppResult<User> {
    if actor.level != SUPERADMIN_LEVEL {
        validate_level_change(pool, user.id, role.level).await?;
    }

    let result = sqlx::query(
        "UPDATE users SET role = ?, role_ref = ?, level = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(&role.name)
    .bind(role.id.to_string())
    .bind(role.level)
    .bind(crate::utils::utc_now())
    .bind(user.id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    fetch_user(pool, user.id).await
}
