use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{Loggable, Severity};
use crate::models::{json_string_list, parse_uuid, to_json_list};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    /// Unique, normalized (trimmed + lowercased) role name.
    pub name: String,
    /// Authority rank in [1,10]; a smaller number outranks a larger one.
    pub level: i64,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn permission_set(&self) -> HashSet<String> {
        crate::permissions::normalize_token_set(&self.permissions)
    }

    pub fn is_superadmin(&self) -> bool {
        self.name == crate::permissions::SUPERADMIN_ROLE
    }
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub name: String,
    pub level: i64,
    pub permissions: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(value: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: parse_uuid(&value.id, "role")?,
            name: value.name,
            level: value.level,
            permissions: json_string_list(&value.permissions)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const ROLE_COLUMNS: &str = "id, name, level, permissions, created_at, updated_at";

pub async fn fetch_role(pool: &SqlitePool, role_id: Uuid) -> AppResult<Role> {
    let db_role = sqlx::query_as::<_, DbRole>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"
    ))
    .bind(role_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("role not found"))?;

    db_role.try_into()
}

pub async fn fetch_role_by_name(pool: &SqlitePool, name: &str) -> AppResult<Option<Role>> {
    let db_role = sqlx::query_as::<_, DbRole>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE name = ?"
    ))
    .bind(name.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;

    db_role.map(Role::try_from).transpose()
}

pub async fn list_roles(pool: &SqlitePool) -> AppResult<Vec<Role>> {
    let rows = sqlx::query_as::<_, DbRole>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles ORDER BY level, name"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Role::try_from).collect()
}

pub async fn insert_role(
    pool: &SqlitePool,
    name: &str,
    level: i64,
    permissions: &[String],
) -> AppResult<Role> {
    let id = Uuid::new_v4();
    let now = crate::utils::utc_now();

    sqlx::query(
        "INSERT INTO roles (id, name, level, permissions, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(level)
    .bind(to_json_list(permissions))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    fetch_role(pool, id).await
}

/// Number of users whose `role_ref` points at this role. Deletion is blocked
/// while this is non-zero.
pub async fn count_role_users(pool: &SqlitePool, role_id: Uuid) -> AppResult<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE role_ref = ? AND deleted_at IS NULL")
            .bind(role_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(count)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "manager")]
    pub name: String,
    #[schema(example = 3)]
    pub level: i64,
    #[schema(example = json!(["leads:read", "leads:create"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRenameRequest {
    #[schema(example = "team_lead")]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleLevelRequest {
    #[schema(example = 2)]
    pub level: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RolePermissionsRequest {
    #[schema(example = json!(["leads:read", "leads:update"]))]
    pub permissions: Vec<String>,
}
