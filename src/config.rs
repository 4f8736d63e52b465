use std::{env, net::SocketAddr, path::PathBuf};

use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub cache_root: PathBuf,
    pub cookie_secret: String,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: Url,
    pub gemini_model: String,
    pub rates_api_base: Url,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://fairfare.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let cache_root = env::var("CACHE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("cache"));

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-fairfare-cookie-secret".to_string());

        // Missing key disables AI features entirely (fail-open, never fatal).
        let gemini_api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let gemini_api_base = parse_base_url(
            "GEMINI_API_BASE",
            "https://generativelanguage.googleapis.com/v1beta/",
        )?;
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-flash-latest".to_string());

        let rates_api_base = parse_base_url("RATES_API_BASE", "https://open.er-api.com/")?;

        Ok(Self {
            database_url,
            listen_addr,
            cache_root,
            cookie_secret,
            gemini_api_key,
            gemini_api_base,
            gemini_model,
            rates_api_base,
        })
    }
}

fn parse_base_url(var: &str, default: &str) -> Result<Url, AppError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    // Url::join silently replaces the last path segment unless the base ends in '/'.
    let raw = if raw.ends_with('/') { raw } else { format!("{raw}/") };
    Url::parse(&raw).map_err(|err| AppError::Config(format!("invalid {var}: {err}")))
}
