use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    budget,
    error::AppError,
    models::trip::{Trip, TripStatus},
    services::gemini::PackingList,
    state::AppState,
    sync::TripView,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_trips).post(create_trip))
        .route("/current", get(current_view))
        .route("/:id/select", post(select_trip))
        .route("/:id/expenses", post(add_expense))
        .route("/:id/complete", post(complete_trip))
        .route("/:id", delete(delete_trip))
}

pub fn extras_router() -> Router<AppState> {
    Router::new()
        .route("/api/analytics", get(analytics))
        .route("/api/rates/:base", get(rates))
        .route("/api/packing-list", post(packing_list))
        .route("/api/last-view", get(load_last_view).put(save_last_view))
}

#[derive(Serialize)]
struct TripListResponse {
    trips: Vec<Trip>,
    selected_id: Option<String>,
    view: TripView,
}

async fn list_trips(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<TripListResponse>, AppError> {
    let user = current.require_user()?;
    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    dashboard
        .refresh(&state.remote, &state.cache, &user.uuid)
        .await;
    Ok(Json(TripListResponse {
        trips: dashboard.registry.trips().to_vec(),
        selected_id: dashboard.registry.selected_id().map(str::to_string),
        view: dashboard.view(),
    }))
}

#[derive(Deserialize)]
struct CreateTripRequest {
    destination: String,
    purpose: Option<String>,
    budget: f64,
    duration_days: i64,
}

#[derive(Serialize)]
struct CreateTripResponse {
    trip: Trip,
    view: TripView,
}

async fn create_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateTripRequest>,
) -> Result<Json<CreateTripResponse>, AppError> {
    let user = current.require_user()?;
    let destination = req.destination.trim().to_string();
    if destination.is_empty() {
        return Err(AppError::BadRequest("destination is required".to_string()));
    }
    if !(req.budget > 0.0) {
        return Err(AppError::BadRequest(
            "budget must be greater than zero".to_string(),
        ));
    }
    if req.duration_days < 1 {
        return Err(AppError::BadRequest(
            "duration must be at least one day".to_string(),
        ));
    }

    // Planning is best effort. A trip without recommendations is still a
    // trip; only a hard upstream refusal aborts creation.
    let purpose = req
        .purpose
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let recommendations = state
        .gemini
        .plan_trip(&destination, purpose, req.duration_days, req.budget)
        .await?;

    let trip = Trip {
        id: Uuid::new_v4().to_string(),
        user_uuid: user.uuid.clone(),
        destination,
        purpose: purpose.map(str::to_string),
        budget: req.budget,
        duration_days: req.duration_days,
        status: TripStatus::Active,
        remaining_budget: Some(req.budget),
        recommendations,
        created_at: Some(Utc::now()),
    };
    // A failed remote save is not fatal; the trip lives on locally and the
    // current-trip cache entry keeps it reachable across restarts.
    if let Err(err) = state.remote.create_trip(&trip).await {
        warn!(trip = %trip.id, error = %err, "remote trip save failed; keeping trip locally");
    }
    info!(trip = %trip.id, destination = %trip.destination, "trip created");

    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    dashboard.registry.upsert(trip.clone());
    let view = dashboard.select(&state.sync, &trip.id).await?;
    if let Err(err) = state.cache.save_current_trip(&user.uuid, &trip).await {
        warn!(trip = %trip.id, error = %err, "could not cache current trip");
    }
    Ok(Json(CreateTripResponse { trip, view }))
}

async fn current_view(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<TripView>, AppError> {
    let user = current.require_user()?;
    let dashboards = state.dashboards.lock().await;
    let view = dashboards
        .get(&user.uuid)
        .map(|d| d.view())
        .unwrap_or_else(TripView::empty);
    Ok(Json(view))
}

#[derive(Serialize)]
struct SelectResponse {
    trip: Trip,
    view: TripView,
}

async fn select_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<SelectResponse>, AppError> {
    let user = current.require_user()?;
    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    if dashboard.registry.is_empty() {
        dashboard
            .refresh(&state.remote, &state.cache, &user.uuid)
            .await;
    }
    let view = dashboard.select(&state.sync, &trip_id).await?;
    let trip = dashboard
        .selected_trip()
        .cloned()
        .ok_or(AppError::NotFound)?;
    if let Err(err) = state.cache.save_current_trip(&user.uuid, &trip).await {
        warn!(trip = %trip.id, error = %err, "could not cache current trip");
    }
    Ok(Json(SelectResponse { trip, view }))
}

#[derive(Deserialize)]
struct AddExpenseRequest {
    name: String,
    cost: f64,
    city: Option<String>,
    /// Resubmit past a price warning.
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct AddExpenseResponse {
    flagged: bool,
    message: Option<String>,
    view: TripView,
}

async fn add_expense(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
    Json(req): Json<AddExpenseRequest>,
) -> Result<Json<AddExpenseResponse>, AppError> {
    let user = current.require_user()?;

    // Resolve the selection under the lock, then release it; the shared
    // dashboard map must never be held across an unbounded upstream call.
    let (city, view_before) = {
        let mut dashboards = state.dashboards.lock().await;
        let dashboard = dashboards.entry(user.uuid.clone()).or_default();
        if dashboard
            .selected_trip()
            .map(|t| t.id != trip_id)
            .unwrap_or(true)
        {
            dashboard
                .refresh(&state.remote, &state.cache, &user.uuid)
                .await;
            dashboard.select(&state.sync, &trip_id).await?;
        }

        let trip = dashboard.selected_trip().ok_or(AppError::NotFound)?;
        // Frozen trips never reach the price check.
        if trip.status == TripStatus::Completed {
            return Err(AppError::BadRequest(
                "this trip is completed; expenses are frozen".to_string(),
            ));
        }

        let city = req
            .city
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| trip.destination.clone());
        (city, dashboard.view())
    };

    if !req.force {
        let verdict = state.gemini.check_price(&req.name, req.cost, &city).await;
        if verdict.flagged {
            return Ok(Json(AddExpenseResponse {
                flagged: true,
                message: verdict.message,
                view: view_before,
            }));
        }
    }

    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    // The selection may have moved while the lock was released.
    if dashboard
        .selected_trip()
        .map(|t| t.id != trip_id)
        .unwrap_or(true)
    {
        dashboard.select(&state.sync, &trip_id).await?;
    }
    let added = dashboard
        .add_expense(&state.sync, &req.name, req.cost, &city)
        .await?;
    let view = added.unwrap_or_else(|| dashboard.view());
    Ok(Json(AddExpenseResponse {
        flagged: false,
        message: None,
        view,
    }))
}

async fn complete_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    let user = current.require_user()?;
    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    if dashboard.registry.is_empty() {
        dashboard
            .refresh(&state.remote, &state.cache, &user.uuid)
            .await;
    }
    let trip = dashboard.complete(&state.remote, &trip_id)?;
    info!(trip = %trip_id, "trip completed");
    Ok(Json(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<TripListResponse>, AppError> {
    let user = current.require_user()?;
    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    if dashboard.registry.is_empty() {
        dashboard
            .refresh(&state.remote, &state.cache, &user.uuid)
            .await;
    }
    let view = dashboard
        .delete(&state.sync, &state.remote, &user.uuid, &trip_id)
        .await?;
    info!(trip = %trip_id, "trip deleted");
    Ok(Json(TripListResponse {
        trips: dashboard.registry.trips().to_vec(),
        selected_id: dashboard.registry.selected_id().map(str::to_string),
        view,
    }))
}

#[derive(Serialize)]
struct AnalyticsResponse {
    total_trips: usize,
    completed_trips: usize,
    unique_destinations: usize,
    total_savings: f64,
}

async fn analytics(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<AnalyticsResponse>, AppError> {
    let user = current.require_user()?;
    let mut dashboards = state.dashboards.lock().await;
    let dashboard = dashboards.entry(user.uuid.clone()).or_default();
    dashboard
        .refresh(&state.remote, &state.cache, &user.uuid)
        .await;
    let trips = dashboard.registry.trips();
    Ok(Json(AnalyticsResponse {
        total_trips: trips.len(),
        completed_trips: trips
            .iter()
            .filter(|t| t.status == TripStatus::Completed)
            .count(),
        unique_destinations: budget::unique_destinations(trips),
        total_savings: budget::compute_savings(trips),
    }))
}

async fn rates(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(base): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    current.require_user()?;
    let rates = state.rates.fetch(&base).await?;
    Ok(Json(serde_json::json!({
        "base": base.to_uppercase(),
        "rates": rates,
    })))
}

#[derive(Deserialize)]
struct PackingListRequest {
    destination: String,
}

async fn packing_list(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<PackingListRequest>,
) -> Result<Json<PackingList>, AppError> {
    current.require_user()?;
    let destination = req.destination.trim();
    if destination.is_empty() {
        return Err(AppError::BadRequest("destination is required".to_string()));
    }
    let list = state
        .gemini
        .packing_list(destination)
        .await?
        .ok_or_else(|| {
            AppError::Upstream("packing list generator is not configured".to_string())
        })?;
    Ok(Json(list))
}

#[derive(Serialize, Deserialize)]
struct LastViewPayload {
    view: String,
}

async fn load_last_view(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<LastViewPayload>, AppError> {
    let user = current.require_user()?;
    let view = state
        .cache
        .load_last_view(&user.uuid)
        .await
        .unwrap_or_else(|| "dashboard".to_string());
    Ok(Json(LastViewPayload { view }))
}

async fn save_last_view(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<LastViewPayload>,
) -> Result<Json<LastViewPayload>, AppError> {
    let user = current.require_user()?;
    state.cache.save_last_view(&user.uuid, &payload.view).await?;
    Ok(Json(payload))
}
