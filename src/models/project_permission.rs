use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{Loggable, Severity};
use crate::models::{json_string_list, parse_uuid, to_json_list};

/// Boolean capability flags scoped to one project. Creation/edit/view default
/// permissive; delete/manage/export default restrictive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProjectRestrictions {
    pub can_create_leads: bool,
    pub can_edit_leads: bool,
    pub can_delete_leads: bool,
    pub can_manage_users: bool,
    pub can_view_reports: bool,
    pub can_export_data: bool,
}

impl Default for ProjectRestrictions {
    fn default() -> Self {
        Self {
            can_create_leads: true,
            can_edit_leads: true,
            can_delete_leads: false,
            can_manage_users: false,
            can_view_reports: true,
            can_export_data: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProjectPermissionOverrides {
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
}

/// Per-(user, project) overlay on the global effective permission set. An
/// inactive or expired row behaves exactly as if it did not exist.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProjectPermission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub permissions: ProjectPermissionOverrides,
    pub restrictions: ProjectRestrictions,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProjectPermission {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

impl Loggable for UserProjectPermission {
    fn entity_type() -> &'static str { "user_project_permission" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUserProjectPermission {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub allowed: String,
    pub denied: String,
    pub can_create_leads: bool,
    pub can_edit_leads: bool,
    pub can_delete_leads: bool,
    pub can_manage_users: bool,
    pub can_view_reports: bool,
    pub can_export_data: bool,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbUserProjectPermission> for UserProjectPermission {
    type Error = AppError;

    fn try_from(value: DbUserProjectPermission) -> Result<Self, Self::Error> {
        Ok(UserProjectPermission {
            id: parse_uuid(&value.id, "user_project_permission")?,
            user_id: parse_uuid(&value.user_id, "user")?,
            project_id: parse_uuid(&value.project_id, "project")?,
            permissions: ProjectPermissionOverrides {
                allowed: json_string_list(&value.allowed)?,
                denied: json_string_list(&value.denied)?,
            },
            restrictions: ProjectRestrictions {
                can_create_leads: value.can_create_leads,
                can_edit_leads: value.can_edit_leads,
                can_delete_leads: value.can_delete_leads,
                can_manage_users: value.can_manage_users,
                can_view_reports: value.can_view_reports,
                can_export_data: value.can_export_data,
            },
            is_active: value.is_active,
            expires_at: value.expires_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const OVERLAY_COLUMNS: &str = "id, user_id, project_id, allowed, denied, \
     can_create_leads, can_edit_leads, can_delete_leads, can_manage_users, \
     can_view_reports, can_export_data, is_active, expires_at, created_at, updated_at";

pub async fn fetch_overlay(
    pool: &SqlitePool,
    user_id: Uuid,
    project_id: Uuid,
) -> AppResult<Option<UserProjectPermission>> {
    let row = sqlx::query_as::<_, DbUserProjectPermission>(&format!(
        "SELECT {OVERLAY_COLUMNS} FROM user_project_permissions WHERE user_id = ? AND project_id = ?"
    ))
    .bind(user_id.to_string())
    .bind(project_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(UserProjectPermission::try_from).transpose()
}

pub async fn upsert_overlay(
    pool: &SqlitePool,
    user_id: Uuid,
    project_id: Uuid,
    overrides: &ProjectPermissionOverrides,
    restrictions: &ProjectRestrictions,
    expires_at: Option<DateTime<Utc>>,
) -> AppResult<UserProjectPermission> {
    let now = crate::utils::utc_now();
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO user_project_permissions \
           (id, user_id, project_id, allowed, denied, can_create_leads, can_edit_leads, \
            can_delete_leads, can_manage_users, can_view_reports, can_export_data, \
            is_active, expires_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?) \
         ON CONFLICT (user_id, project_id) DO UPDATE SET \
           allowed = excluded.allowed, denied = excluded.denied, \
           can_create_leads = excluded.can_create_leads, \
           can_edit_leads = excluded.can_edit_leads, \
           can_delete_leads = excluded.can_delete_leads, \
           can_manage_users = excluded.can_manage_users, \
           can_view_reports = excluded.can_view_reports, \
           can_export_data = excluded.can_export_data, \
           is_active = 1, expires_at = excluded.expires_at, updated_at = excluded.updated_at",
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(project_id.to_string())
    .bind(to_json_list(&overrides.allowed))
    .bind(to_json_list(&overrides.denied))
    .bind(restrictions.can_create_leads)
    .bind(restrictions.can_edit_leads)
    .bind(restrictions.can_delete_leads)
    .bind(restrictions.can_manage_users)
    .bind(restrictions.can_view_reports)
    .bind(restrictions.can_export_data)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    fetch_overlay(pool, user_id, project_id)
        .await?
        .ok_or_else(|| AppError::internal("overlay row missing after upsert"))
}

pub async fn deactivate_overlay(pool: &SqlitePool, user_id: Uuid, project_id: Uuid) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE user_project_permissions SET is_active = 0, updated_at = ? WHERE user_id = ? AND project_id = ?",
    )
    .bind(crate::utils::utc_now())
    .bind(user_id.to_string())
    .bind(project_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("project permission overlay not found"));
    }

    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OverlayUpsertRequest {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
    /// Omitted flags keep their defaults.
    #[serde(default)]
    pub restrictions: Option<ProjectRestrictions>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
