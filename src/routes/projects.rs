use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::project::{
    add_project_member, count_user_memberships, fetch_project, is_project_member,
    list_member_projects, project_member_ids, remove_project_member, Project,
    ProjectCreateRequest, ProjectMemberRequest, ProjectResponse,
};
use crate::models::user::fetch_user;
use crate::permissions::tokens;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:project_id", get(get_project))
        .route("/:project_id/members", post(add_member))
        .route("/:project_id/members/:user_id", delete(remove_member))
}

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "Projects the requester belongs to", body = [Project])),
    security(("bearerAuth" = []))
)]
async fn list(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Project>>> {
    authz::load_active_user(&state.pool, auth.user_id).await?;
    Ok(Json(list_member_projects(&state.pool, auth.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses((status = 201, description = "Project created", body = ProjectResponse)),
    security(("bearerAuth" = []))
)]
async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    let actor =
        authz::require_permission(&state, auth.user_id, tokens::PROJECTS_CREATE, None).await?;

    if payload.name.trim().is_empty() {
        return Err(AppError::validation("project name must not be empty"));
    }

    let now = utc_now();
    let project_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO projects (id, owner_id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(project_id.to_string())
    .bind(actor.id.to_string())
    .bind(payload.name.trim())
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    // The owner is always a member.
    add_project_member(&state.pool, project_id, actor.id).await?;

    let project = fetch_project(&state.pool, project_id).await?;
    let members = project_member_ids(&state.pool, project_id).await?;

    log_activity(&state.event_bus, "created", Some(actor.id), &project);

    Ok((StatusCode::CREATED, Json(ProjectResponse { project, members })))
}

#[utoipa::path(
    get,
    path = "/projects/{project_id}",
    tag = "Projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project detail", body = ProjectResponse)),
    security(("bearerAuth" = []))
)]
async fn get_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectResponse>> {
    let project = authz::require_project_membership(&state, auth.user_id, project_id).await?;
    let members = project_member_ids(&state.pool, project_id).await?;
    Ok(Json(ProjectResponse { project, members }))
}

#[utoipa::path(
    post,
    path = "/projects/{project_id}/members",
    tag = "Projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = ProjectMemberRequest,
    responses(
        (status = 200, description = "Member added", body = ProjectResponse),
        (status = 403, description = "Target user restricted from this project")
    ),
    security(("bearerAuth" = []))
)]
async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<ProjectMemberRequest>,
) -> AppResult<Json<ProjectResponse>> {
    let project = authz::require_project_membership(&state, auth.user_id, project_id).await?;
    let actor = authz::require_permission(
        &state,
        auth.user_id,
        tokens::PROJECTS_MANAGE,
        Some(project_id),
    )
    .await?;

    let target = fetch_user(&state.pool, payload.user_id).await?;
    enforce_membership_restrictions(&state, &target, project_id).await?;

    add_project_member(&state.pool, project_id, target.id).await?;

    let members = project_member_ids(&state.pool, project_id).await?;

    log_activity(&state.event_bus, "member_added", Some(actor.id), &project);

    Ok(Json(ProjectResponse { project, members }))
}

#[utoipa::path(
    delete,
    path = "/projects/{project_id}/members/{user_id}",
    tag = "Projects",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "User id")
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Owner cannot be removed")
    ),
    security(("bearerAuth" = []))
)]
async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let project = authz::require_project_membership(&state, auth.user_id, project_id).await?;
    let actor = authz::require_permission(
        &state,
        auth.user_id,
        tokens::PROJECTS_MANAGE,
        Some(project_id),
    )
    .await?;

    if project.is_owner(user_id) {
        return Err(AppError::forbidden_operation("the project owner cannot be removed"));
    }

    remove_project_member(&state.pool, project_id, user_id).await?;

    log_activity(&state.event_bus, "member_removed", Some(actor.id), &project);

    Ok(StatusCode::NO_CONTENT)
}

/// The user-level project restrictions: membership cap, project deny list,
/// and (when non-empty) project allow list.
async fn enforce_membership_restrictions(
    state: &AppState,
    target: &crate::models::user::User,
    project_id: Uuid,
) -> AppResult<()> {
    if target.restrictions.denied_projects.contains(&project_id) {
        return Err(AppError::forbidden("user is denied access to this project"));
    }

    if !target.restrictions.allowed_projects.is_empty()
        && !target.restrictions.allowed_projects.contains(&project_id)
    {
        return Err(AppError::forbidden("project is not on the user's allow list"));
    }

    if let Some(max_projects) = target.restrictions.max_projects {
        if is_project_member(&state.pool, project_id, target.id).await? {
            return Ok(());
        }
        let current = count_user_memberships(&state.pool, target.id).await?;
        if current >= max_projects {
            return Err(AppError::forbidden(format!(
                "user already belongs to the maximum of {max_projects} project(s)"
            )));
        }
    }

    Ok(())
}
