//! The set of known trips for a user, with the current selection and each
//! trip's lifecycle state. Pure in-memory bookkeeping; remote and cache
//! effects are orchestrated by the dashboard layer.

use std::cmp::Ordering;

use crate::models::trip::{Trip, TripStatus};

/// Budget shown when no trip is selected (the empty dashboard state).
pub const DEFAULT_BUDGET: f64 = 5000.0;

#[derive(Debug, Default)]
pub struct TripRegistry {
    trips: Vec<Trip>,
    selected: Option<String>,
}

/// What happened to the selection after a trip was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The removed trip was not selected; the view is untouched.
    Untouched,
    /// Selection moved to the most recently created remaining trip.
    Promoted(String),
    /// No trips remain; the view must reset to the empty defaults.
    Cleared,
}

impl TripRegistry {
    /// Replaces the cached trip list, newest first. A previous selection that
    /// no longer exists is dropped.
    pub fn hydrate(&mut self, trips: Vec<Trip>) {
        self.trips = trips;
        self.sort();
        if let Some(selected) = &self.selected {
            if !self.trips.iter().any(|trip| &trip.id == selected) {
                self.selected = None;
            }
        }
    }

    fn sort(&mut self) {
        // Descending by creation time; trips without a timestamp sort last.
        self.trips
            .sort_by(|a, b| match (&a.created_at, &b.created_at) {
                (Some(a_ts), Some(b_ts)) => b_ts.cmp(a_ts),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
    }

    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn get(&self, trip_id: &str) -> Option<&Trip> {
        self.trips.iter().find(|trip| trip.id == trip_id)
    }

    fn get_mut(&mut self, trip_id: &str) -> Option<&mut Trip> {
        self.trips.iter_mut().find(|trip| trip.id == trip_id)
    }

    pub fn selected(&self) -> Option<&Trip> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Points the current-trip selection at `trip_id` if it is known.
    pub fn select(&mut self, trip_id: &str) -> bool {
        if self.get(trip_id).is_some() {
            self.selected = Some(trip_id.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Inserts a freshly created trip (or replaces a stale copy of it).
    pub fn upsert(&mut self, trip: Trip) {
        self.trips.retain(|existing| existing.id != trip.id);
        self.trips.push(trip);
        self.sort();
    }

    /// Flips a trip to completed locally. Returns false for unknown trips.
    pub fn complete(&mut self, trip_id: &str) -> bool {
        match self.get_mut(trip_id) {
            Some(trip) => {
                trip.status = TripStatus::Completed;
                true
            }
            None => false,
        }
    }

    pub fn set_remaining(&mut self, trip_id: &str, remaining: f64) {
        if let Some(trip) = self.get_mut(trip_id) {
            trip.remaining_budget = Some(remaining);
        }
    }

    /// Removes a trip. If it was selected, promotes the most recently created
    /// remaining trip, or clears the selection when none remain.
    pub fn remove(&mut self, trip_id: &str) -> RemovalOutcome {
        let was_selected = self.selected_id() == Some(trip_id);
        self.trips.retain(|trip| trip.id != trip_id);

        if !was_selected {
            return RemovalOutcome::Untouched;
        }

        match self.trips.first() {
            Some(next) => {
                let next_id = next.id.clone();
                self.selected = Some(next_id.clone());
                RemovalOutcome::Promoted(next_id)
            }
            None => {
                self.selected = None;
                RemovalOutcome::Cleared
            }
        }
    }
}
