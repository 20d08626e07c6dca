//! User administration: permission overrides, effective-permission inspection,
//! and role reassignment.

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::role::fetch_role_by_name;
use crate::models::user::{
    list_users, update_restrictions, EffectivePermissionsResponse, PermissionTokensRequest,
    ReassignRoleRequest, RestrictionsRequest, SetPermissionsRequest, User, UserRestrictions,
};
use crate::permissions::{diff, hierarchy, resolver, sorted_tokens, tokens};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/:user_id", get(get_user))
        .route("/:user_id/permissions", put(set_permissions))
        .route("/:user_id/permissions/allow", post(allow_permissions))
        .route("/:user_id/permissions/deny", post(deny_permissions))
        .route("/:user_id/effective-permissions", get(effective_permissions))
        .route("/:user_id/role", put(reassign_role))
        .route("/:user_id/restrictions", put(set_restrictions))
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses((status = 200, description = "List users", body = [User])),
    security(("bearerAuth" = []))
)]
async fn list(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<User>>> {
    authz::require_permission(&state, auth.user_id, tokens::USERS_READ, None).await?;
    Ok(Json(list_users(&state.pool).await?))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User detail", body = User)),
    security(("bearerAuth" = []))
)]
async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<User>> {
    if auth.user_id != user_id {
        authz::require_permission(&state, auth.user_id, tokens::USERS_READ, None).await?;
    }
    Ok(Json(crate::models::user::fetch_user(&state.pool, user_id).await?))
}

/// Overwrite the target's effective permission set ("clean slate" update).
#[utoipa::path(
    put,
    path = "/users/{user_id}/permissions",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = SetPermissionsRequest,
    responses(
        (status = 200, description = "Permissions updated", body = User),
        (status = 403, description = "Target not manageable or superadmin-protected")
    ),
    security(("bearerAuth" = []))
)]
async fn set_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetPermissionsRequest>,
) -> AppResult<Json<User>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    let target = authz::require_manageable_target(&state, &actor, user_id).await?;

    let updated =
        diff::set_effective_permissions(&state.pool, &state.roles, &target, &payload.permissions)
            .await?;

    log_activity(&state.event_bus, "permissions_changed", Some(actor.id), &updated);

    Ok(Json(updated))
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/permissions/allow",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = PermissionTokensRequest,
    responses((status = 200, description = "Permissions granted", body = User)),
    security(("bearerAuth" = []))
)]
async fn allow_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<PermissionTokensRequest>,
) -> AppResult<Json<User>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    let target = authz::require_manageable_target(&state, &actor, user_id).await?;

    let updated =
        diff::allow_permissions(&state.pool, &state.roles, &target, &payload.permissions).await?;

    log_activity(&state.event_bus, "permissions_changed", Some(actor.id), &updated);

    Ok(Json(updated))
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/permissions/deny",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = PermissionTokensRequest,
    responses((status = 200, description = "Permissions revoked", body = User)),
    security(("bearerAuth" = []))
)]
async fn deny_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<PermissionTokensRequest>,
) -> AppResult<Json<User>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    let target = authz::require_manageable_target(&state, &actor, user_id).await?;

    let updated = diff::deny_permissions(&state.pool, &target, &payload.permissions).await?;

    log_activity(&state.event_bus, "permissions_changed", Some(actor.id), &updated);

    Ok(Json(updated))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/effective-permissions",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Resolved permission set", body = EffectivePermissionsResponse)),
    security(("bearerAuth" = []))
)]
async fn effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissionsResponse>> {
    if auth.user_id != user_id {
        authz::require_permission(&state, auth.user_id, tokens::USERS_READ, None).await?;
    }

    let user = crate::models::user::fetch_user(&state.pool, user_id).await?;
    let effective = resolver::effective_permissions(&state.pool, &state.roles, &user).await?;

    Ok(Json(EffectivePermissionsResponse {
        user_id: user.id,
        role: user.role,
        permissions: sorted_tokens(&effective),
    }))
}

/// Replace the target's project restrictions: membership cap, allow list,
/// deny list. Enforced when project memberships change.
#[utoipa::path(
    put,
    path = "/users/{user_id}/restrictions",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = RestrictionsRequest,
    responses((status = 200, description = "Restrictions updated", body = User)),
    security(("bearerAuth" = []))
)]
async fn set_restrictions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<RestrictionsRequest>,
) -> AppResult<Json<User>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    let target = authz::require_manageable_target(&state, &actor, user_id).await?;

    if let Some(max_projects) = payload.max_projects {
        if max_projects < 0 {
            return Err(AppError::validation("max_projects must not be negative"));
        }
    }

    let restrictions = UserRestrictions {
        max_projects: payload.max_projects,
        allowed_projects: payload.allowed_projects,
        denied_projects: payload.denied_projects,
    };
    update_restrictions(&state.pool, target.id, &restrictions).await?;

    let updated = crate::models::user::fetch_user(&state.pool, target.id).await?;

    log_activity(&state.event_bus, "updated", Some(actor.id), &updated);

    Ok(Json(updated))
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/role",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = ReassignRoleRequest,
    responses(
        (status = 200, description = "Role reassigned", body = User),
        (status = 409, description = "Rank conflict with reporting hierarchy")
    ),
    security(("bearerAuth" = []))
)]
async fn reassign_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ReassignRoleRequest>,
) -> AppResult<Json<User>> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    let target = authz::require_manageable_target(&state, &actor, user_id).await?;

    let role = fetch_role_by_name(&state.pool, payload.role.trim())
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;

    let updated = hierarchy::reassign_role(&state.pool, &actor, &target, &role).await?;

    log_activity(&state.event_bus, "role_reassigned", Some(actor.id), &updated);

    Ok(Json(updated))
}
