//! Per-user composition of the trip registry and the active sync session.
//! All selection changes run through here so the old subscription is always
//! released before (never after) the new trip's state is established — a
//! stale feed must not mutate the wrong trip's view.

use tracing::warn;

use crate::{
    error::AppError,
    models::trip::{Trip, TripStatus},
    registry::{RemovalOutcome, TripRegistry},
    services::{cache::CacheStore, remote::RemoteStore},
    sync::{SyncCoordinator, TripSync, TripView},
};

#[derive(Default)]
pub struct Dashboard {
    pub registry: TripRegistry,
    active: Option<TripSync>,
}

impl Dashboard {
    /// Reloads the user's trips from the remote store. When the store is
    /// unreachable the cached current trip (if any) keeps the view usable.
    pub async fn refresh(&mut self, remote: &RemoteStore, cache: &CacheStore, user_uuid: &str) {
        match remote.trips_for_user(user_uuid).await {
            Ok(trips) => self.registry.hydrate(trips),
            Err(err) => {
                warn!(user = %user_uuid, error = %err, "trip listing unavailable; falling back to cached trip");
                if let Some(trip) = cache.load_current_trip(user_uuid).await {
                    self.registry.hydrate(vec![trip]);
                }
            }
        }
    }

    /// Switches the current trip. The previous session is closed first, so
    /// none of its in-flight state bleeds into the new selection.
    pub async fn select(
        &mut self,
        sync: &SyncCoordinator,
        trip_id: &str,
    ) -> Result<TripView, AppError> {
        let trip = self
            .registry
            .get(trip_id)
            .cloned()
            .ok_or(AppError::NotFound)?;

        if let Some(active) = self.active.take() {
            active.close();
        }
        self.registry.select(trip_id);

        let session = sync.open(&trip).await;
        let view = session.view();
        self.active = Some(session);
        Ok(view)
    }

    pub fn view(&self) -> TripView {
        self.active
            .as_ref()
            .map(TripSync::view)
            .unwrap_or_else(TripView::empty)
    }

    pub fn selected_trip(&self) -> Option<&Trip> {
        self.registry.selected()
    }

    /// Logs an expense against the selected trip. Completed trips are frozen.
    /// Returns `Ok(None)` for the silent validation no-op.
    pub async fn add_expense(
        &mut self,
        sync: &SyncCoordinator,
        name: &str,
        cost: f64,
        city: &str,
    ) -> Result<Option<TripView>, AppError> {
        let Some(trip) = self.registry.selected() else {
            return Err(AppError::BadRequest("no trip selected".to_string()));
        };
        if trip.status == TripStatus::Completed {
            return Err(AppError::BadRequest(
                "this trip is completed; expenses are frozen".to_string(),
            ));
        }
        let Some(active) = self.active.as_ref() else {
            return Err(AppError::BadRequest("no trip selected".to_string()));
        };
        Ok(sync.add_expense(active, name, cost, city).await)
    }

    /// Ends a trip. The local flip is immediate; the remote update is fire
    /// and forget, and its failure never un-completes the trip.
    pub fn complete(&mut self, remote: &RemoteStore, trip_id: &str) -> Result<Trip, AppError> {
        if !self.registry.complete(trip_id) {
            return Err(AppError::NotFound);
        }

        let remaining = self
            .active
            .as_ref()
            .filter(|session| session.trip_id() == trip_id)
            .map(|session| session.view().totals.remaining);
        if let Some(remaining) = remaining {
            self.registry.set_remaining(trip_id, remaining);
        }

        let remote = remote.clone();
        let trip_id_owned = trip_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = remote
                .set_trip_status(&trip_id_owned, TripStatus::Completed)
                .await
            {
                warn!(trip = %trip_id_owned, error = %err, "remote completion failed; trip stays completed locally");
            }
            if let Some(remaining) = remaining {
                if let Err(err) = remote.set_remaining_budget(&trip_id_owned, remaining).await {
                    warn!(trip = %trip_id_owned, error = %err, "remaining-budget update failed");
                }
            }
        });

        self.registry
            .get(trip_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Deletes a trip everywhere: remote store (failure here is surfaced),
    /// local cache, registry. Deleting the selected trip promotes the most
    /// recent remaining one, or resets the view to the empty defaults.
    pub async fn delete(
        &mut self,
        sync: &SyncCoordinator,
        remote: &RemoteStore,
        user_uuid: &str,
        trip_id: &str,
    ) -> Result<TripView, AppError> {
        if self.registry.get(trip_id).is_none() {
            return Err(AppError::NotFound);
        }

        remote.delete_trip(trip_id).await?;
        if let Err(err) = sync.cache().clear(trip_id).await {
            warn!(trip = %trip_id, error = %err, "could not clear expense cache");
        }
        sync.cache().clear_current_trip_if(user_uuid, trip_id).await;

        match self.registry.remove(trip_id) {
            RemovalOutcome::Promoted(next_id) => self.select(sync, &next_id).await,
            RemovalOutcome::Cleared => {
                if let Some(active) = self.active.take() {
                    active.close();
                }
                Ok(TripView::empty())
            }
            RemovalOutcome::Untouched => Ok(self.view()),
        }
    }

    /// Sign-out teardown: releases the live subscription.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.close();
        }
        self.registry.clear_selection();
    }
}
