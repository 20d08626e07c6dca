use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{json_uuid_list, parse_uuid, to_json_uuid_list};

/// One edge of the reporting graph: `user` reports to `superior`. `ancestors`
/// is the materialized list of the superior's own ancestor ids, so descendant
/// lookups are exact id membership checks instead of path-string matching.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportingLink {
    pub user_id: Uuid,
    pub superior_id: Uuid,
    pub ancestors: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbReportingLink {
    pub user_id: String,
    pub superior_id: String,
    pub ancestors: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbReportingLink> for ReportingLink {
    type Error = AppError;

    fn try_from(value: DbReportingLink) -> Result<Self, Self::Error> {
        Ok(ReportingLink {
            user_id: parse_uuid(&value.user_id, "user")?,
            superior_id: parse_uuid(&value.superior_id, "user")?,
            ancestors: json_uuid_list(&value.ancestors)?,
            created_at: value.created_at,
        })
    }
}

pub async fn links_of(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<ReportingLink>> {
    let rows = sqlx::query_as::<_, DbReportingLink>(
        "SELECT user_id, superior_id, ancestors, created_at FROM reporting_links WHERE user_id = ? ORDER BY created_at",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ReportingLink::try_from).collect()
}

pub async fn link_exists(pool: &SqlitePool, user_id: Uuid, superior_id: Uuid) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM reporting_links WHERE user_id = ? AND superior_id = ?",
    )
    .bind(user_id.to_string())
    .bind(superior_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

pub async fn insert_link(
    pool: &SqlitePool,
    user_id: Uuid,
    superior_id: Uuid,
    ancestors: &[Uuid],
) -> AppResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO reporting_links (user_id, superior_id, ancestors, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(superior_id.to_string())
    .bind(to_json_uuid_list(ancestors))
    .bind(crate::utils::utc_now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_link(pool: &SqlitePool, user_id: Uuid, superior_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM reporting_links WHERE user_id = ? AND superior_id = ?")
        .bind(user_id.to_string())
        .bind(superior_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportingLinkRequest {
    pub superior_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReportingOverviewResponse {
    pub user_id: Uuid,
    pub superiors: Vec<ReportingPeerDto>,
    pub subordinates: Vec<ReportingPeerDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReportingPeerDto {
    pub user_id: Uuid,
    pub level: i64,
}
