//! Per-(user, project) permission overlays.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::AppResult;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::project_permission::{
    deactivate_overlay, upsert_overlay, OverlayUpsertRequest, ProjectPermissionOverrides,
    UserProjectPermission,
};
use crate::models::user::fetch_user;
use crate::permissions::resolver::{effective_project_permissions, ProjectPermissionSet};
use crate::permissions::{normalize_token_list, tokens};

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/:user_id",
        get(get_effective).put(upsert).delete(deactivate),
    )
}

#[utoipa::path(
    get,
    path = "/projects/{project_id}/permissions/{user_id}",
    tag = "Project permissions",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "User id")
    ),
    responses((status = 200, description = "Project-effective permission set", body = ProjectPermissionSet)),
    security(("bearerAuth" = []))
)]
async fn get_effective(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ProjectPermissionSet>> {
    authz::require_project_membership(&state, auth.user_id, project_id).await?;
    if auth.user_id != user_id {
        authz::require_permission(&state, auth.user_id, tokens::USERS_READ, Some(project_id))
            .await?;
    }

    let user = fetch_user(&state.pool, user_id).await?;
    let resolved =
        effective_project_permissions(&state.pool, &state.roles, &user, project_id).await?;

    Ok(Json(resolved))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}/permissions/{user_id}",
    tag = "Project permissions",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "User id")
    ),
    request_body = OverlayUpsertRequest,
    responses((status = 200, description = "Overlay stored", body = UserProjectPermission)),
    security(("bearerAuth" = []))
)]
async fn upsert(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<OverlayUpsertRequest>,
) -> AppResult<Json<UserProjectPermission>> {
    authz::require_project_membership(&state, auth.user_id, project_id).await?;
    let actor = authz::require_permission(
        &state,
        auth.user_id,
        tokens::PROJECTS_MANAGE,
        Some(project_id),
    )
    .await?;

    let target = fetch_user(&state.pool, user_id).await?;

    let overrides = ProjectPermissionOverrides {
        allowed: normalize_token_list(&payload.allowed),
        denied: normalize_token_list(&payload.denied),
    };
    let restrictions = payload.restrictions.unwrap_or_default();

    let overlay = upsert_overlay(
        &state.pool,
        target.id,
        project_id,
        &overrides,
        &restrictions,
        payload.expires_at,
    )
    .await?;

    log_activity(&state.event_bus, "updated", Some(actor.id), &overlay);

    Ok(Json(overlay))
}

#[utoipa::path(
    delete,
    path = "/projects/{project_id}/permissions/{user_id}",
    tag = "Project permissions",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "User id")
    ),
    responses((status = 204, description = "Overlay deactivated")),
    security(("bearerAuth" = []))
)]
async fn deactivate(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    authz::require_project_membership(&state, auth.user_id, project_id).await?;
    authz::require_permission(&state, auth.user_id, tokens::PROJECTS_MANAGE, Some(project_id))
        .await?;

    deactivate_overlay(&state.pool, user_id, project_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
