//! Role administration. Level and permission edits fan out to every user on
//! the role through `permissions::cascade`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::role::{
    count_role_users, fetch_role, fetch_role_by_name, insert_role, list_roles as query_roles,
    Role, RoleCreateRequest, RoleLevelRequest, RolePermissionsRequest, RoleRenameRequest,
};
use crate::permissions::cascade::{
    cascade_level_change, cascade_permission_change, cascade_rename, CascadeReport,
};
use crate::permissions::{normalize_token_list, tokens, validate_level, SUPERADMIN_ROLE};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:role_id", get(get_role).put(rename).delete(delete_role))
        .route("/:role_id/level", put(change_level))
        .route("/:role_id/permissions", put(change_permissions))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleCascadeResponse {
    pub role: Role,
    pub cascade: CascadeReport,
}

#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    responses((status = 200, description = "List roles", body = [Role])),
    security(("bearerAuth" = []))
)]
async fn list(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    authz::require_permission(&state, auth.user_id, tokens::ROLES_READ, None).await?;
    Ok(Json(query_roles(&state.pool).await?))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::ROLES_MANAGE, None).await?;

    let name = payload.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(AppError::validation("role name must not be empty"));
    }
    if name == SUPERADMIN_ROLE {
        return Err(AppError::conflict("role name is reserved"));
    }
    validate_level(payload.level)?;

    if fetch_role_by_name(&state.pool, &name).await?.is_some() {
        return Err(AppError::conflict("role name already in use"));
    }

    let permissions = normalize_token_list(&payload.permissions);
    let role = insert_role(&state.pool, &name, payload.level, &permissions).await?;

    log_activity(&state.event_bus, "created", Some(actor.id), &role);

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses((status = 200, description = "Role detail", body = Role)),
    security(("bearerAuth" = []))
)]
async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    authz::require_permission(&state, auth.user_id, tokens::ROLES_READ, None).await?;
    Ok(Json(fetch_role(&state.pool, role_id).await?))
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = RoleRenameRequest,
    responses(
        (status = 200, description = "Role renamed", body = Role),
        (status = 403, description = "Superadmin role cannot be renamed")
    ),
    security(("bearerAuth" = []))
)]
async fn rename(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<RoleRenameRequest>,
) -> AppResult<Json<Role>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::ROLES_MANAGE, None).await?;
    let role = fetch_role(&state.pool, role_id).await?;

    let renamed = cascade_rename(&state.pool, &state.roles, &role, &payload.name).await?;

    log_activity(&state.event_bus, "updated", Some(actor.id), &renamed);

    Ok(Json(renamed))
}

#[utoipa::path(
    delete,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 403, description = "Superadmin role cannot be deleted"),
        (status = 409, description = "Role still referenced by users")
    ),
    security(("bearerAuth" = []))
)]
async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::ROLES_MANAGE, None).await?;
    let role = fetch_role(&state.pool, role_id).await?;

    if role.is_superadmin() {
        return Err(AppError::forbidden_operation("the superadmin role cannot be deleted"));
    }

    let referenced = count_role_users(&state.pool, role.id).await?;
    if referenced > 0 {
        return Err(AppError::conflict(format!(
            "role is still referenced by {referenced} user(s)"
        )));
    }

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role.id.to_string())
        .execute(&state.pool)
        .await?;
    state.roles.invalidate(&role.name).await;

    log_activity(&state.event_bus, "deleted", Some(actor.id), &role);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}/level",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = RoleLevelRequest,
    responses((status = 200, description = "Level changed; cascade applied", body = RoleCascadeResponse)),
    security(("bearerAuth" = []))
)]
async fn change_level(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<RoleLevelRequest>,
) -> AppResult<Json<RoleCascadeResponse>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::ROLES_MANAGE, None).await?;
    let role = fetch_role(&state.pool, role_id).await?;

    let (role, cascade) =
        cascade_level_change(&state.pool, &state.roles, &role, payload.level).await?;

    log_activity(&state.event_bus, "level_changed", Some(actor.id), &role);

    Ok(Json(RoleCascadeResponse { role, cascade }))
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = RolePermissionsRequest,
    responses((status = 200, description = "Permissions changed; user overrides rebased", body = RoleCascadeResponse)),
    security(("bearerAuth" = []))
)]
async fn change_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<RolePermissionsRequest>,
) -> AppResult<Json<RoleCascadeResponse>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::ROLES_MANAGE, None).await?;
    let role = fetch_role(&state.pool, role_id).await?;

    let (role, cascade) =
        cascade_permission_change(&state.pool, &state.roles, &role, &payload.permissions).await?;

    log_activity(&state.event_bus, "permissions_changed", Some(actor.id), &role);

    Ok(Json(RoleCascadeResponse { role, cascade }))
}
