use std::{collections::HashMap, sync::Arc};

use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use tokio::sync::Mutex;

use crate::{
    config::AppConfig,
    dashboard::Dashboard,
    db::DbPool,
    services::{cache::CacheStore, gemini::GeminiService, rates::RatesService, remote::RemoteStore},
    sync::SyncCoordinator,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub cache: CacheStore,
    pub remote: RemoteStore,
    pub gemini: GeminiService,
    pub rates: RatesService,
    pub sync: SyncCoordinator,
    /// One dashboard per signed-in user, keyed by user uuid.
    pub dashboards: Arc<Mutex<HashMap<String, Dashboard>>>,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, cache: CacheStore) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        let remote = RemoteStore::new(db.clone());
        let http = reqwest::Client::new();
        let gemini = GeminiService::new(
            http.clone(),
            config.gemini_api_key.clone(),
            config.gemini_api_base.clone(),
            config.gemini_model.clone(),
        );
        let rates = RatesService::new(http, config.rates_api_base.clone());
        let sync = SyncCoordinator::new(cache.clone(), Arc::new(remote.clone()));
        Self {
            config,
            db,
            cache,
            remote,
            gemini,
            rates,
            sync,
            dashboards: Arc::new(Mutex::new(HashMap::new())),
            cookie_key,
        }
    }
}

impl axum::extract::FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
