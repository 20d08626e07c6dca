use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{Loggable, Severity};
use crate::models::parse_uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

impl Loggable for Project {
    fn entity_type() -> &'static str { "project" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Important }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProject {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbProject> for Project {
    type Error = AppError;

    fn try_from(value: DbProject) -> Result<Self, Self::Error> {
        Ok(Project {
            id: parse_uuid(&value.id, "project")?,
            owner_id: parse_uuid(&value.owner_id, "user")?,
            name: value.name,
            description: value.description,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const PROJECT_COLUMNS: &str =
    "id, owner_id, name, description, created_at, updated_at, deleted_at";

pub async fn fetch_project(pool: &SqlitePool, project_id: Uuid) -> AppResult<Project> {
    sqlx::query_as::<_, DbProject>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(project_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("project not found"))?
    .try_into()
}

pub async fn list_member_projects(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<Project>> {
    let rows = sqlx::query_as::<_, DbProject>(
        "SELECT p.id, p.owner_id, p.name, p.description, p.created_at, p.updated_at, p.deleted_at \
         FROM projects p \
         JOIN project_members pm ON pm.project_id = p.id \
         WHERE pm.user_id = ? AND p.deleted_at IS NULL ORDER BY p.created_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Project::try_from).collect()
}

pub async fn project_member_ids(pool: &SqlitePool, project_id: Uuid) -> AppResult<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT user_id FROM project_members WHERE project_id = ? ORDER BY created_at",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(|id| parse_uuid(id, "user")).collect()
}

pub async fn is_project_member(pool: &SqlitePool, project_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM project_members WHERE project_id = ? AND user_id = ?",
    )
    .bind(project_id.to_string())
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

pub async fn count_user_memberships(pool: &SqlitePool, user_id: Uuid) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM project_members pm \
         JOIN projects p ON p.id = pm.project_id \
         WHERE pm.user_id = ? AND p.deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn add_project_member(pool: &SqlitePool, project_id: Uuid, user_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO project_members (project_id, user_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(project_id.to_string())
    .bind(user_id.to_string())
    .bind(crate::utils::utc_now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn remove_project_member(pool: &SqlitePool, project_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM project_members WHERE project_id = ? AND user_id = ?")
        .bind(project_id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("project member not found"));
    }

    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Q3 Pipeline")]
    pub name: String,
    #[schema(example = "Third-quarter sales pipeline")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub project: Project,
    pub members: Vec<Uuid>,
}
