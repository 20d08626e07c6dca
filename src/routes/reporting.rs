//! Reporting-graph intake consumed by the hierarchy validator.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::reporting::{ReportingLinkRequest, ReportingOverviewResponse, ReportingPeerDto};
use crate::models::user::fetch_user;
use crate::permissions::hierarchy::{
    add_reporting_link, remove_reporting_link, subordinates_of, superiors_of,
};
use crate::permissions::tokens;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(overview).post(add_link))
        .route("/:superior_id", delete(remove_link))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/reporting",
    tag = "Reporting",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Superiors and subordinates", body = ReportingOverviewResponse)),
    security(("bearerAuth" = []))
)]
async fn overview(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ReportingOverviewResponse>> {
    if auth.user_id != user_id {
        authz::require_permission(&state, auth.user_id, tokens::USERS_READ, None).await?;
    }

    let superiors = superiors_of(&state.pool, user_id)
        .await?
        .into_iter()
        .map(|p| ReportingPeerDto { user_id: p.user_id, level: p.level })
        .collect();
    let subordinates = subordinates_of(&state.pool, user_id)
        .await?
        .into_iter()
        .map(|p| ReportingPeerDto { user_id: p.user_id, level: p.level })
        .collect();

    Ok(Json(ReportingOverviewResponse { user_id, superiors, subordinates }))
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/reporting",
    tag = "Reporting",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = ReportingLinkRequest,
    responses(
        (status = 201, description = "Reporting link created"),
        (status = 409, description = "Rank conflict or reporting cycle")
    ),
    security(("bearerAuth" = []))
)]
async fn add_link(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ReportingLinkRequest>,
) -> AppResult<StatusCode> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    authz::require_manageable_target(&state, &actor, user_id).await?;

    let user = fetch_user(&state.pool, user_id).await?;
    let superior = fetch_user(&state.pool, payload.superior_id).await?;

    add_reporting_link(&state.pool, &user, &superior).await?;

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/users/{user_id}/reporting/{superior_id}",
    tag = "Reporting",
    params(
        ("user_id" = Uuid, Path, description = "User id"),
        ("superior_id" = Uuid, Path, description = "Superior user id")
    ),
    responses((status = 204, description = "Reporting link removed")),
    security(("bearerAuth" = []))
)]
async fn remove_link(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, superior_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let actor = authz::require_permission(&state, auth.user_id, tokens::USERS_MANAGE, None).await?;
    authz::require_manageable_target(&state, &actor, user_id).await?;

    if !remove_reporting_link(&state.pool, user_id, superior_id).await? {
        return Err(AppError::not_found("reporting link not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}
