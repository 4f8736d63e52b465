use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::{self, CurrentUser},
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/health", get(health))
}

#[derive(Serialize)]
struct UserResponse {
    uuid: String,
    username: String,
    email: String,
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(PrivateCookieJar, Json<UserResponse>), AppError> {
    let user = auth::register_user(&state.db, &req.username, &req.email, &req.password).await?;
    let session_id = auth::create_session(&state.db, user.id).await?;
    info!(user = %user.username, "account created");
    Ok((
        auth::apply_session_cookie(jar, session_id),
        Json(UserResponse {
            uuid: user.uuid,
            username: user.username,
            email: user.email,
        }),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    identifier: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(PrivateCookieJar, Json<UserResponse>), AppError> {
    let user = auth::authenticate_user(&state.db, &req.identifier, &req.password).await?;
    let session_id = auth::create_session(&state.db, user.id).await?;
    Ok((
        auth::apply_session_cookie(jar, session_id),
        Json(UserResponse {
            uuid: user.uuid,
            username: user.username,
            email: user.email,
        }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<serde_json::Value>), AppError> {
    if let Some(user) = current.0.as_ref() {
        if let Some(mut dashboard) = state.dashboards.lock().await.remove(&user.uuid) {
            dashboard.close();
        }
        if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
            auth::destroy_session(&state.db, cookie.value()).await?;
        }
    }
    Ok((
        auth::clear_session_cookie(jar),
        Json(serde_json::json!({ "ok": true })),
    ))
}

async fn me(current: CurrentUser) -> Result<Json<UserResponse>, AppError> {
    let user = current.require_user()?;
    Ok(Json(UserResponse {
        uuid: user.uuid.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
