use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::project::{fetch_project, is_project_member, Project};
use crate::models::user::{fetch_user, User};
use crate::permissions::resolver;

use super::is_unconditional_admin;

/// Resolve the acting user; rejects unknown and deactivated accounts.
pub async fn load_active_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    let user = match fetch_user(pool, user_id).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::unauthorized("unknown user"));
        }
        Err(err) => return Err(err),
    };

    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }

    Ok(user)
}

/// Require `token` for the acting user, project-scoped when `project` is
/// given. Unconditional admins pass without a resolver call.
pub async fn require_permission(
    state: &AppState,
    user_id: Uuid,
    token: &str,
    project: Option<Uuid>,
) -> AppResult<User> {
    let user = load_active_user(&state.pool, user_id).await?;

    if is_unconditional_admin(&user) {
        tracing::debug!(user_id = %user.id, permission = %token, "superadmin bypass");
        return Ok(user);
    }

    let granted = match project {
        Some(project_id) => {
            let project_set =
                resolver::effective_project_permissions(&state.pool, &state.roles, &user, project_id)
                    .await?;
            match crate::permissions::normalize_token(token) {
                Some(token) => project_set.permissions.iter().any(|t| t == &token),
                None => false,
            }
        }
        None => resolver::has_permission(&state.pool, &state.roles, &user, token).await?,
    };

    if !granted {
        tracing::debug!(user_id = %user.id, permission = %token, "permission denied");
        return Err(AppError::forbidden(format!("missing permission: {token}")));
    }

    Ok(user)
}

/// Require the acting user to be the project's owner, a member, or an
/// unconditional admin.
pub async fn require_project_membership(
    state: &AppState,
    user_id: Uuid,
    project_id: Uuid,
) -> AppResult<Project> {
    let user = load_active_user(&state.pool, user_id).await?;
    let project = fetch_project(&state.pool, project_id).await?;

    if is_unconditional_admin(&user) || project.is_owner(user.id) {
        return Ok(project);
    }

    if is_project_member(&state.pool, project_id, user.id).await? {
        return Ok(project);
    }

    Err(AppError::forbidden("not a member of this project"))
}

/// Require the actor to outrank the target user (strictly lower numeric
/// level); unconditional admins bypass. Returns the target.
pub async fn require_manageable_target(
    state: &AppState,
    actor: &User,
    target_id: Uuid,
) -> AppResult<User> {
    let target = fetch_user(&state.pool, target_id).await?;

    if is_unconditional_admin(actor) {
        return Ok(target);
    }

    if actor.level >= target.level {
        return Err(AppError::forbidden(
            "insufficient rank to manage this user",
        ));
    }

    Ok(target)
}
