//! Durable local cache: per-trip expense lists plus the small side entries
//! (last selected view, current-trip fallback) as JSON files on disk.
//!
//! Reads are forgiving by contract: a missing, empty, or corrupt file is an
//! empty result, never an error the caller has to handle.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tracing::warn;

use crate::{
    error::AppError,
    models::{expense::Expense, trip::Trip},
};

const CURRENT_TRIP_FILE: &str = "current_trip.json";
const LAST_VIEW_FILE: &str = "last_view.json";

#[derive(Clone)]
pub struct CacheStore {
    root: Arc<PathBuf>,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_structure(&self) -> Result<(), AppError> {
        fs::create_dir_all(self.root().join("trips")).await?;
        fs::create_dir_all(self.root().join("users")).await?;
        Ok(())
    }

    fn trip_file(&self, trip_id: &str) -> PathBuf {
        self.root().join("trips").join(format!("{trip_id}.json"))
    }

    fn user_dir(&self, user_uuid: &str) -> PathBuf {
        self.root().join("users").join(user_uuid)
    }

    /// Cached expense list for a trip. Absence and corruption both read as
    /// empty; corruption is logged and the bad file left for inspection.
    pub async fn get(&self, trip_id: &str) -> Vec<Expense> {
        let path = self.trip_file(trip_id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        if raw.is_empty() {
            return Vec::new();
        }
        match serde_json::from_slice(&raw) {
            Ok(expenses) => expenses,
            Err(err) => {
                warn!(trip = %trip_id, error = %err, "corrupt expense cache; treating as empty");
                Vec::new()
            }
        }
    }

    pub async fn put(&self, trip_id: &str, expenses: &[Expense]) -> Result<(), AppError> {
        fs::create_dir_all(self.root().join("trips")).await?;
        let data = serde_json::to_vec_pretty(expenses).map_err(|err| AppError::Other(err.into()))?;
        fs::write(self.trip_file(trip_id), data).await?;
        Ok(())
    }

    pub async fn clear(&self, trip_id: &str) -> Result<(), AppError> {
        match fs::remove_file(self.trip_file(trip_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Full serialized current trip, used as an offline fallback when the
    /// remote store is unreachable at login time.
    pub async fn save_current_trip(&self, user_uuid: &str, trip: &Trip) -> Result<(), AppError> {
        self.write_user_file(user_uuid, CURRENT_TRIP_FILE, trip).await
    }

    pub async fn load_current_trip(&self, user_uuid: &str) -> Option<Trip> {
        self.read_user_file(user_uuid, CURRENT_TRIP_FILE).await
    }

    /// Drops the current-trip fallback if it points at the given trip.
    pub async fn clear_current_trip_if(&self, user_uuid: &str, trip_id: &str) {
        if let Some(trip) = self.load_current_trip(user_uuid).await {
            if trip.id == trip_id {
                let path = self.user_dir(user_uuid).join(CURRENT_TRIP_FILE);
                if let Err(err) = fs::remove_file(&path).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(user = %user_uuid, error = %err, "could not drop current-trip fallback");
                    }
                }
            }
        }
    }

    pub async fn save_last_view(&self, user_uuid: &str, view: &str) -> Result<(), AppError> {
        self.write_user_file(user_uuid, LAST_VIEW_FILE, &view.to_string())
            .await
    }

    pub async fn load_last_view(&self, user_uuid: &str) -> Option<String> {
        self.read_user_file(user_uuid, LAST_VIEW_FILE).await
    }

    async fn write_user_file<T: serde::Serialize>(
        &self,
        user_uuid: &str,
        filename: &str,
        value: &T,
    ) -> Result<(), AppError> {
        let dir = self.user_dir(user_uuid);
        fs::create_dir_all(&dir).await?;
        let data = serde_json::to_vec_pretty(value).map_err(|err| AppError::Other(err.into()))?;
        fs::write(dir.join(filename), data).await?;
        Ok(())
    }

    async fn read_user_file<T: serde::de::DeserializeOwned>(
        &self,
        user_uuid: &str,
        filename: &str,
    ) -> Option<T> {
        let path = self.user_dir(user_uuid).join(filename);
        let raw = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(user = %user_uuid, file = %filename, error = %err, "corrupt cache entry ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, CacheStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = CacheStore::new(dir.path().to_path_buf());
        store.ensure_structure().await.expect("ensure structure");
        (dir, store)
    }

    #[tokio::test]
    async fn round_trips_an_expense_list() {
        let (_dir, store) = store().await;
        let expenses = vec![
            Expense::new("t1", "Taxi", 250.0, "Goa"),
            Expense::new("t1", "Lunch", 120.0, "Goa"),
        ];
        store.put("t1", &expenses).await.expect("put");
        assert_eq!(store.get("t1").await, expenses);
    }

    #[tokio::test]
    async fn missing_trip_reads_as_empty() {
        let (_dir, store) = store().await;
        assert!(store.get("never-written").await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let (_dir, store) = store().await;
        store.put("t1", &[Expense::new("t1", "Taxi", 1.0, "Goa")])
            .await
            .expect("put");
        tokio::fs::write(store.trip_file("t1"), b"{not json")
            .await
            .expect("scribble");
        assert!(store.get("t1").await.is_empty());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (_dir, store) = store().await;
        store.put("t1", &[]).await.expect("put");
        store.clear("t1").await.expect("clear once");
        store.clear("t1").await.expect("clear twice");
        assert!(store.get("t1").await.is_empty());
    }

    #[tokio::test]
    async fn current_trip_fallback_is_scoped_to_its_trip() {
        let (_dir, store) = store().await;
        let trip = Trip {
            id: "t1".to_string(),
            user_uuid: "u1".to_string(),
            destination: "Goa".to_string(),
            purpose: None,
            budget: 5000.0,
            duration_days: 4,
            status: Default::default(),
            remaining_budget: Some(5000.0),
            recommendations: None,
            created_at: None,
        };
        store.save_current_trip("u1", &trip).await.expect("save");
        assert_eq!(store.load_current_trip("u1").await.map(|t| t.id), Some("t1".into()));

        store.clear_current_trip_if("u1", "other").await;
        assert!(store.load_current_trip("u1").await.is_some());
        store.clear_current_trip_if("u1", "t1").await;
        assert!(store.load_current_trip("u1").await.is_none());
    }

    #[tokio::test]
    async fn last_view_round_trips() {
        let (_dir, store) = store().await;
        assert_eq!(store.load_last_view("u1").await, None);
        store.save_last_view("u1", "dashboard").await.expect("save");
        assert_eq!(store.load_last_view("u1").await.as_deref(), Some("dashboard"));
    }
}
