//! The remote document store: trips and their nested expense collections in
//! sqlite, plus the live expense feed. Every expense write republishes the
//! full ordered snapshot to that trip's watch channel, so subscribers always
//! converge on the authoritative list (last snapshot wins).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tokio::sync::watch;
use tracing::warn;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        expense::Expense,
        trip::{Trip, TripStatus},
    },
    sync::ExpenseFeed,
};

#[derive(Clone)]
pub struct RemoteStore {
    db: DbPool,
    feeds: Arc<Mutex<HashMap<String, watch::Sender<Vec<Expense>>>>>,
}

impl RemoteStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            feeds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn create_trip(&self, trip: &Trip) -> Result<(), AppError> {
        let recommendations = trip
            .recommendations
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| AppError::Other(err.into()))?;

        sqlx::query(
            "INSERT INTO trips (id, user_uuid, destination, purpose, budget, duration_days, status, remaining_budget, recommendations, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&trip.id)
        .bind(&trip.user_uuid)
        .bind(&trip.destination)
        .bind(&trip.purpose)
        .bind(trip.budget)
        .bind(trip.duration_days)
        .bind(trip.status.as_str())
        .bind(trip.remaining_budget)
        .bind(recommendations)
        .bind(trip.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        let row = sqlx::query("SELECT * FROM trips WHERE id = ?1")
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|row| trip_from_row(&row)))
    }

    pub async fn trips_for_user(&self, user_uuid: &str) -> Result<Vec<Trip>, AppError> {
        let rows = sqlx::query("SELECT * FROM trips WHERE user_uuid = ?1")
            .bind(user_uuid)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.iter().map(trip_from_row).collect())
    }

    pub async fn set_trip_status(&self, trip_id: &str, status: TripStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE trips SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn set_remaining_budget(
        &self,
        trip_id: &str,
        remaining: f64,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE trips SET remaining_budget = ?1 WHERE id = ?2")
            .bind(remaining)
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Removes the trip and its nested expense collection, and ends the
    /// trip's live feed so stale subscriptions wind down.
    pub async fn delete_trip(&self, trip_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM expenses WHERE trip_id = ?1")
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        sqlx::query("DELETE FROM trips WHERE id = ?1")
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        self.feeds
            .lock()
            .expect("feed registry lock poisoned")
            .remove(trip_id);
        Ok(())
    }

    pub async fn expenses_for_trip(&self, trip_id: &str) -> Result<Vec<Expense>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM expenses WHERE trip_id = ?1 ORDER BY timestamp DESC, id DESC",
        )
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.iter().map(expense_from_row).collect())
    }

    fn publish(&self, trip_id: &str, snapshot: Vec<Expense>) {
        let feeds = self.feeds.lock().expect("feed registry lock poisoned");
        if let Some(sender) = feeds.get(trip_id) {
            sender.send_replace(snapshot);
        }
    }
}

#[async_trait]
impl ExpenseFeed for RemoteStore {
    async fn subscribe(&self, trip_id: &str) -> Result<watch::Receiver<Vec<Expense>>, AppError> {
        let snapshot = self.expenses_for_trip(trip_id).await?;
        let mut feeds = self.feeds.lock().expect("feed registry lock poisoned");
        let receiver = match feeds.get(trip_id) {
            Some(sender) => {
                // Refresh existing subscribers with the fresh query as well;
                // re-delivery is idempotent on their side.
                sender.send_replace(snapshot);
                sender.subscribe()
            }
            None => {
                let (sender, receiver) = watch::channel(snapshot);
                feeds.insert(trip_id.to_string(), sender);
                receiver
            }
        };
        Ok(receiver)
    }

    async fn write(&self, trip_id: &str, expense: &Expense) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO expenses (id, trip_id, name, cost, city, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&expense.id)
        .bind(trip_id)
        .bind(&expense.name)
        .bind(expense.cost)
        .bind(&expense.city)
        .bind(expense.timestamp)
        .execute(&self.db)
        .await?;

        // Keep the trips row's derived remaining-budget cache in step.
        sqlx::query(
            "UPDATE trips SET remaining_budget = budget - \
             (SELECT COALESCE(SUM(cost), 0) FROM expenses WHERE trip_id = ?1) \
             WHERE id = ?1",
        )
        .bind(trip_id)
        .execute(&self.db)
        .await?;

        let snapshot = self.expenses_for_trip(trip_id).await?;
        self.publish(trip_id, snapshot);
        Ok(())
    }
}

fn trip_from_row(row: &SqliteRow) -> Trip {
    let recommendations = row
        .get::<Option<String>, _>("recommendations")
        .and_then(|raw| match serde_json::from_str(&raw) {
            Ok(bundle) => Some(bundle),
            Err(err) => {
                warn!(error = %err, "unreadable recommendation bundle dropped");
                None
            }
        });

    Trip {
        id: row.get("id"),
        user_uuid: row.get("user_uuid"),
        destination: row.get("destination"),
        purpose: row.get("purpose"),
        budget: row.get("budget"),
        duration_days: row.get("duration_days"),
        status: TripStatus::parse(row.get::<String, _>("status").as_str()),
        remaining_budget: row.get("remaining_budget"),
        recommendations,
        created_at: row.get::<Option<DateTime<Utc>>, _>("created_at"),
    }
}

fn expense_from_row(row: &SqliteRow) -> Expense {
    Expense {
        id: row.get("id"),
        trip_id: row.get("trip_id"),
        name: row.get("name"),
        cost: row.get("cost"),
        city: row.get("city"),
        timestamp: row.get("timestamp"),
    }
}
