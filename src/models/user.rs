use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{Loggable, Severity};
use crate::models::{
    json_string_list, json_uuid_list, parse_uuid, to_json_list, to_json_uuid_list,
};

/// Per-user overrides on top of the role's base permission set. `denied` always
/// wins over `allowed` and over role membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CustomPermissions {
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserRestrictions {
    pub max_projects: Option<i64>,
    pub allowed_projects: Vec<Uuid>,
    pub denied_projects: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Denormalized role name; changes only together with `role_ref` and
    /// `level` (via role reassignment or a role cascade).
    pub role: String,
    pub role_ref: Uuid,
    pub level: i64,
    pub custom_permissions: CustomPermissions,
    pub is_active: bool,
    pub restrictions: UserRestrictions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn has_superadmin_role(&self) -> bool {
        self.role == crate::permissions::SUPERADMIN_ROLE
    }
}

impl Loggable for User {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub role_ref: String,
    pub level: i64,
    pub custom_allowed: String,
    pub custom_denied: String,
    pub is_active: bool,
    pub max_projects: Option<i64>,
    pub allowed_projects: String,
    pub denied_projects: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(value: DbUser) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_uuid(&value.id, "user")?,
            name: value.name,
            email: value.email,
            role: value.role,
            role_ref: parse_uuid(&value.role_ref, "role")?,
            level: value.level,
            custom_permissions: CustomPermissions {
                allowed: json_string_list(&value.custom_allowed)?,
                denied: json_string_list(&value.custom_denied)?,
            },
            is_active: value.is_active,
            restrictions: UserRestrictions {
                max_projects: value.max_projects,
                allowed_projects: json_uuid_list(&value.allowed_projects)?,
                denied_projects: json_uuid_list(&value.denied_projects)?,
            },
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, role_ref, level, \
     custom_allowed, custom_denied, is_active, max_projects, allowed_projects, \
     denied_projects, created_at, updated_at, deleted_at";

pub async fn fetch_db_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}

pub async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    fetch_db_user(pool, user_id).await?.try_into()
}

pub async fn fetch_db_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let db_user = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = ? AND deleted_at IS NULL"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(db_user)
}

pub async fn list_users(pool: &SqlitePool) -> AppResult<Vec<User>> {
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(User::try_from).collect()
}

pub async fn users_with_role(pool: &SqlitePool, role_id: Uuid) -> AppResult<Vec<User>> {
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE role_ref = ? AND deleted_at IS NULL ORDER BY created_at"
    ))
    .bind(role_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(User::try_from).collect()
}

/// Persist a user's custom allow/deny lists. Callers are expected to hand in
/// already-normalized token lists (see `permissions::diff`).
pub async fn update_custom_permissions(
    pool: &SqlitePool,
    user_id: Uuid,
    allowed: &[String],
    denied: &[String],
) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE users SET custom_allowed = ?, custom_denied = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(to_json_list(allowed))
    .bind(to_json_list(denied))
    .bind(crate::utils::utc_now())
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    Ok(())
}

pub async fn update_restrictions(
    pool: &SqlitePool,
    user_id: Uuid,
    restrictions: &UserRestrictions,
) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE users SET max_projects = ?, allowed_projects = ?, denied_projects = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(restrictions.max_projects)
    .bind(to_json_uuid_list(&restrictions.allowed_projects))
    .bind(to_json_uuid_list(&restrictions.denied_projects))
    .bind(crate::utils::utc_now())
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPermissionsRequest {
    /// The full set of permission tokens the user should effectively have.
    #[schema(example = json!(["leads:read", "leads:delete"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionTokensRequest {
    #[schema(example = json!(["leads:delete"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RestrictionsRequest {
    #[schema(example = 3)]
    pub max_projects: Option<i64>,
    #[serde(default)]
    pub allowed_projects: Vec<Uuid>,
    #[serde(default)]
    pub denied_projects: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReassignRoleRequest {
    #[schema(example = "manager")]
    pub role: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissionsResponse {
    pub user_id: Uuid,
    pub role: String,
    /// Sorted for stable output.
    pub permissions: Vec<String>,
}
