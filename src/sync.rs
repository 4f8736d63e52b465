//! Per-trip synchronization between the local cache and the remote expense
//! feed: cache-first rendering, live subscription, optimistic local writes,
//! and snapshot reconciliation.
//!
//! The state machine per trip session is
//! `Uninitialized -> CacheLoaded -> Subscribed -> Reconciled`, re-entering
//! `Reconciled` on every snapshot, with a terminal `Closed` on unsubscribe.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    budget::{self, BudgetTotals},
    error::AppError,
    models::{expense::Expense, trip::Trip},
    registry::DEFAULT_BUDGET,
    services::cache::CacheStore,
};

/// Live view of a trip's remote expense collection.
///
/// A subscription guarantees an initial snapshot followed by zero or more
/// updates, ordered, without an exactly-once guarantee; duplicate delivery
/// must stay harmless for the subscriber. Writes eventually succeed or fail
/// retryably and never roll back optimistic local state.
#[async_trait]
pub trait ExpenseFeed: Send + Sync {
    async fn subscribe(&self, trip_id: &str) -> Result<watch::Receiver<Vec<Expense>>, AppError>;
    async fn write(&self, trip_id: &str, expense: &Expense) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Uninitialized,
    CacheLoaded,
    Subscribed,
    Reconciled,
    Closed,
}

/// The single in-memory view the coordinator mutates and everyone else reads.
#[derive(Debug, Clone, Serialize)]
pub struct TripView {
    pub trip_id: String,
    pub phase: SyncPhase,
    pub budget: f64,
    pub expenses: Vec<Expense>,
    pub totals: BudgetTotals,
}

impl TripView {
    /// The dashboard with nothing selected: default budget, no expenses.
    pub fn empty() -> Self {
        Self {
            trip_id: String::new(),
            phase: SyncPhase::Uninitialized,
            budget: DEFAULT_BUDGET,
            expenses: Vec::new(),
            totals: budget::compute_totals(&[], DEFAULT_BUDGET),
        }
    }
}

/// An open sync session for one trip. Dropping it releases the subscription.
pub struct TripSync {
    view: Arc<Mutex<TripView>>,
    task: Option<JoinHandle<()>>,
}

impl TripSync {
    pub fn view(&self) -> TripView {
        self.view.lock().expect("trip view lock poisoned").clone()
    }

    pub fn trip_id(&self) -> String {
        self.view.lock().expect("trip view lock poisoned").trip_id.clone()
    }

    /// Terminal transition: no snapshot may mutate state past this point.
    pub fn close(&self) {
        {
            let mut view = self.view.lock().expect("trip view lock poisoned");
            view.phase = SyncPhase::Closed;
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for TripSync {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    cache: CacheStore,
    feed: Arc<dyn ExpenseFeed>,
}

impl SyncCoordinator {
    pub fn new(cache: CacheStore, feed: Arc<dyn ExpenseFeed>) -> Self {
        Self { cache, feed }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Opens a session: cached expenses first (stale-but-fast), then a live
    /// subscription. A failing subscription is logged and the session keeps
    /// serving the cached state; it never blocks on remote errors.
    pub async fn open(&self, trip: &Trip) -> TripSync {
        let mut view = TripView {
            trip_id: trip.id.clone(),
            phase: SyncPhase::Uninitialized,
            budget: trip.budget,
            expenses: Vec::new(),
            totals: budget::compute_totals(&[], trip.budget),
        };

        let cached = self.cache.get(&trip.id).await;
        if !cached.is_empty() {
            view.totals = budget::compute_totals(&cached, view.budget);
            view.expenses = cached;
        }
        view.phase = SyncPhase::CacheLoaded;

        let receiver = match self.feed.subscribe(&trip.id).await {
            Ok(receiver) => {
                view.phase = SyncPhase::Subscribed;
                Some(receiver)
            }
            Err(err) => {
                warn!(trip = %trip.id, error = %err, "expense feed unavailable; serving cached state");
                None
            }
        };

        let view = Arc::new(Mutex::new(view));
        let task = receiver.map(|receiver| {
            let view = Arc::clone(&view);
            let cache = self.cache.clone();
            let trip_id = trip.id.clone();
            tokio::spawn(async move {
                run_subscription(view, cache, trip_id, receiver).await;
            })
        });

        TripSync { view, task }
    }

    /// Optimistic write: the provisional expense is prepended locally and
    /// persisted to the cache before the remote write is even attempted.
    /// Blank name or city silently no-ops. Returns the refreshed view.
    pub async fn add_expense(
        &self,
        session: &TripSync,
        name: &str,
        cost: f64,
        city: &str,
    ) -> Option<TripView> {
        let name = name.trim();
        let city = city.trim();
        if name.is_empty() || city.is_empty() {
            return None;
        }

        let (trip_id, snapshot, expense, refreshed) = {
            let mut view = session.view.lock().expect("trip view lock poisoned");
            if view.phase == SyncPhase::Closed {
                return None;
            }
            let expense = Expense::new(&view.trip_id, name, cost, city);
            view.expenses.insert(0, expense.clone());
            view.totals = budget::compute_totals(&view.expenses, view.budget);
            (
                view.trip_id.clone(),
                view.expenses.clone(),
                expense,
                view.clone(),
            )
        };

        if let Err(err) = self.cache.put(&trip_id, &snapshot).await {
            warn!(trip = %trip_id, error = %err, "could not persist expense cache");
        }

        // Fire and forget; a failed write leaves the local copy in place and
        // the next authoritative snapshot settles the difference.
        let feed = Arc::clone(&self.feed);
        tokio::spawn(async move {
            match feed.write(&trip_id, &expense).await {
                Ok(()) => debug!(trip = %trip_id, expense = %expense.id, "remote expense write confirmed"),
                Err(err) => {
                    warn!(trip = %trip_id, expense = %expense.id, error = %err, "remote expense write failed; keeping local copy")
                }
            }
        });

        Some(refreshed)
    }
}

async fn run_subscription(
    view: Arc<Mutex<TripView>>,
    cache: CacheStore,
    trip_id: String,
    mut receiver: watch::Receiver<Vec<Expense>>,
) {
    loop {
        // Remote is authoritative: wholesale replace, then mirror to cache.
        let snapshot = receiver.borrow_and_update().clone();
        if !apply_snapshot(&view, &snapshot) {
            break;
        }
        if let Err(err) = cache.put(&trip_id, &snapshot).await {
            warn!(trip = %trip_id, error = %err, "could not mirror snapshot to cache");
        }
        if receiver.changed().await.is_err() {
            debug!(trip = %trip_id, "expense feed ended");
            break;
        }
    }
}

/// Returns false once the session is closed, so the subscription task stops.
fn apply_snapshot(view: &Arc<Mutex<TripView>>, snapshot: &[Expense]) -> bool {
    let mut view = view.lock().expect("trip view lock poisoned");
    if view.phase == SyncPhase::Closed {
        return false;
    }
    view.expenses = snapshot.to_vec();
    view.totals = budget::compute_totals(&view.expenses, view.budget);
    view.phase = SyncPhase::Reconciled;
    true
}
