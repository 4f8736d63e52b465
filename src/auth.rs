use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::{db::DbPool, error::AppError, models::user::User, state::AppState};

pub const SESSION_COOKIE: &str = "fairfare_session";

const SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = match PrivateCookieJar::<Key>::from_request_parts(parts, state).await {
            Ok(jar) => jar,
            Err(err) => match err {},
        };
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(Self(None));
        };
        let user = load_session_user(&state.db, cookie.value()).await?;
        Ok(Self(user))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

pub async fn register_user(
    db: &DbPool,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let username = username.trim();
    let email = email.trim();
    if username.is_empty() || email.is_empty() {
        return Err(AppError::BadRequest(
            "username and email are required".to_string(),
        ));
    }
    if password.len() < 8 {
        return Err(AppError::BadRequest(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? OR email = ?",
    )
    .bind(username)
    .bind(email)
    .fetch_one(db)
    .await?;
    if existing > 0 {
        return Err(AppError::BadRequest(
            "username or email already taken".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("password hashing failed: {err}"))?
        .to_string();

    let uuid = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (uuid, username, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&uuid)
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(now.to_rfc3339())
    .execute(db)
    .await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE uuid = ?")
        .bind(&uuid)
        .fetch_one(db)
        .await?;
    debug!(user = %user.username, "registered new user");
    Ok(user)
}

pub async fn authenticate_user(
    db: &DbPool,
    identifier: &str,
    password: &str,
) -> Result<User, AppError> {
    let identifier = identifier.trim();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ? OR email = ?")
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let parsed = PasswordHash::new(&user.password_hash)
        .map_err(|err| anyhow::anyhow!("stored password hash is invalid: {err}"))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::Unauthorized)?;

    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(user.id)
        .execute(db)
        .await?;
    Ok(user)
}

pub async fn create_session(db: &DbPool, user_id: i64) -> Result<String, AppError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires = now + Duration::days(SESSION_TTL_DAYS);
    sqlx::query(
        "INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(expires.to_rfc3339())
    .execute(db)
    .await?;
    Ok(id)
}

pub async fn destroy_session(db: &DbPool, session_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(session_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn load_session_user(
    db: &DbPool,
    session_id: &str,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let row = sqlx::query_as::<_, (i64, String, String, String, Option<String>)>(
        "SELECT u.id, u.uuid, u.username, u.email, s.expires_at \
         FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.id = ?",
    )
    .bind(session_id)
    .fetch_optional(db)
    .await?;

    let Some((id, uuid, username, email, expires_at)) = row else {
        return Ok(None);
    };

    if let Some(expires_at) = expires_at {
        let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t.with_timezone(&Utc) < Utc::now())
            .unwrap_or(true);
        if expired {
            destroy_session(db, session_id).await?;
            return Ok(None);
        }
    }

    sqlx::query("UPDATE sessions SET last_seen_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .execute(db)
        .await?;

    Ok(Some(AuthenticatedUser {
        id,
        uuid,
        username,
        email,
    }))
}

pub fn apply_session_cookie(jar: PrivateCookieJar, session_id: String) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tempfile::TempDir;
    use url::Url;

    use crate::{config::AppConfig, db::init_pool, services::cache::CacheStore};

    async fn state_in(dir: &TempDir) -> AppState {
        let db_path = dir.path().join("auth.sqlite");
        std::fs::File::create(&db_path).expect("db file");
        let config = AppConfig {
            database_url: format!("sqlite://{}", db_path.to_string_lossy()),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cache_root: dir.path().join("cache"),
            cookie_secret: "auth-test-secret".into(),
            gemini_api_key: None,
            gemini_api_base: Url::parse("http://127.0.0.1:9/").expect("url"),
            gemini_model: "test-model".into(),
            rates_api_base: Url::parse("http://127.0.0.1:9/").expect("url"),
        };
        let db = init_pool(&config.database_url).await.expect("pool");
        sqlx::migrate!("./migrations").run(&db).await.expect("migrate");
        let cache = CacheStore::new(config.cache_root.clone());
        AppState::new(config, db, cache)
    }

    #[tokio::test]
    async fn request_without_session_cookie_is_anonymous() {
        let dir = TempDir::new().expect("tempdir");
        let state = state_in(&dir).await;

        let request = axum::http::Request::builder()
            .uri("/api/trips")
            .body(())
            .expect("request");
        let (mut parts, _) = request.into_parts();
        let current = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .expect("extract");
        assert!(current.0.is_none());
        assert!(matches!(current.require_user(), Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn session_round_trip_loads_the_user() {
        let dir = TempDir::new().expect("tempdir");
        let state = state_in(&dir).await;

        let user = register_user(&state.db, "lucy", "lucy@example.com", "hunter2secret")
            .await
            .expect("register");
        let session_id = create_session(&state.db, user.id).await.expect("session");

        let loaded = load_session_user(&state.db, &session_id)
            .await
            .expect("load")
            .expect("session resolves");
        assert_eq!(loaded.uuid, user.uuid);

        destroy_session(&state.db, &session_id).await.expect("destroy");
        assert!(load_session_user(&state.db, &session_id)
            .await
            .expect("load")
            .is_none());
    }
}
