use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::DEFAULT_ROLE;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::role::fetch_role_by_name;
use crate::models::user::{
    fetch_db_user_by_email, fetch_user, AuthResponse, LoginRequest, RegisterRequest, User,
};
use crate::permissions::SUPERADMIN_ROLE;
use crate::utils::{hash_password, utc_now, verify_password};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    if payload.name.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(AppError::validation("name and email are required"));
    }

    if fetch_db_user_by_email(&state.pool, &payload.email).await?.is_some() {
        return Err(AppError::conflict("email already in use"));
    }

    // The first account becomes the superadmin; everyone after that starts on
    // the default role.
    let user_count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE deleted_at IS NULL")
            .fetch_one(&state.pool)
            .await?;
    let role_name = if user_count == 0 { SUPERADMIN_ROLE } else { DEFAULT_ROLE };

    let role = fetch_role_by_name(&state.pool, role_name)
        .await?
        .ok_or_else(|| AppError::internal("built-in role missing"))?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, role_ref, level, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(payload.name.trim())
    .bind(payload.email.trim())
    .bind(password_hash)
    .bind(&role.name)
    .bind(role.id.to_string())
    .bind(role.level)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let user = fetch_user(&state.pool, user_id).await?;
    let token = state.jwt.encode(user.id)?;

    log_activity(&state.event_bus, "registered", Some(user.id), &user);

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = fetch_db_user_by_email(&state.pool, &payload.email)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let password_ok = verify_password(&payload.password, &db_user.password_hash)?;
    if !password_ok {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let user: User = db_user.try_into()?;
    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }

    let token = state.jwt.encode(user.id)?;

    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let user = fetch_user(&state.pool, auth.user_id).await?;
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged")),
    security(("bearerAuth" = []))
)]
pub async fn logout(_auth: AuthUser) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}
