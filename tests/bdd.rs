use std::{fmt, fs::File, net::SocketAddr, time::Duration};

use anyhow::Context;
use cucumber::{given, then, when, World as _};
use fairfare::{
    auth::{self, AuthenticatedUser},
    config::AppConfig,
    dashboard::Dashboard,
    db::init_pool,
    error::AppError,
    models::trip::{Trip, TripStatus},
    registry::DEFAULT_BUDGET,
    services::cache::CacheStore,
    state::AppState,
    sync::ExpenseFeed,
};
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    registered_user: Option<AuthenticatedUser>,
    trip_id: Option<String>,
}

impl AppWorld {
    fn app_state(&self) -> &AppState {
        &self
            .state
            .as_ref()
            .expect("state must be initialised first")
            .app
    }

    fn dashboard(&mut self) -> &mut Dashboard {
        &mut self
            .state
            .as_mut()
            .expect("state must be initialised first")
            .dashboard
    }

    fn user_uuid(&self) -> String {
        self.registered_user
            .as_ref()
            .expect("user must be registered first")
            .uuid
            .clone()
    }

    fn trip_id(&self) -> String {
        self.trip_id.clone().expect("trip must be created first")
    }
}

struct TestState {
    app: AppState,
    dashboard: Dashboard,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let cache_root = root.path().join("cache");
        std::fs::create_dir_all(&cache_root)?;

        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        // Keyless assistant config: recommendations come back empty and the
        // price guardrail stays open, so no network is touched.
        let config = AppConfig {
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cache_root: cache_root.clone(),
            cookie_secret: "bdd-cookie-secret".into(),
            gemini_api_key: None,
            gemini_api_base: Url::parse("http://127.0.0.1:9/").unwrap(),
            gemini_model: "test-model".into(),
            rates_api_base: Url::parse("http://127.0.0.1:9/").unwrap(),
        };

        let db = init_pool(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let cache = CacheStore::new(config.cache_root.clone());
        cache.ensure_structure().await?;

        let app = AppState::new(config, db, cache);
        Ok(Self {
            app,
            dashboard: Dashboard::default(),
            _root: root,
        })
    }
}

async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.registered_user = None;
    world.trip_id = None;
}

#[given(
    regex = r#"^a registered user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn given_registered_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    register_user(world, username, email, password).await;
}

#[when(
    regex = r#"^I register a user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn when_register_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    register_user(world, username, email, password).await;
}

#[then(regex = r#"^I can authenticate as \"([^\"]+)\" using password \"([^\"]+)\"$"#)]
async fn then_can_authenticate(world: &mut AppWorld, identifier: String, password: String) {
    let authed = auth::authenticate_user(&world.app_state().db, &identifier, &password)
        .await
        .expect("authentication");
    assert_eq!(authed.username, identifier);
}

#[then(regex = r#"^registering \"([^\"]+)\" again with email \"([^\"]+)\" is rejected$"#)]
async fn then_duplicate_rejected(world: &mut AppWorld, username: String, email: String) {
    let result =
        auth::register_user(&world.app_state().db, &username, &email, "whatever-pass").await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[when(regex = r#"^I create a trip to \"([^\"]+)\" with budget (\d+(?:\.\d+)?) for (\d+) days$"#)]
async fn when_create_trip(world: &mut AppWorld, destination: String, budget: f64, days: i64) {
    let user_uuid = world.user_uuid();
    let state = world.app_state().clone();
    let recommendations = state
        .gemini
        .plan_trip(&destination, None, days, budget)
        .await
        .expect("keyless planner never fails");
    let trip = Trip {
        id: Uuid::new_v4().to_string(),
        user_uuid,
        destination,
        purpose: None,
        budget,
        duration_days: days,
        status: TripStatus::Active,
        remaining_budget: Some(budget),
        recommendations,
        created_at: Some(chrono::Utc::now()),
    };
    state.remote.create_trip(&trip).await.expect("create trip");
    world.dashboard().registry.upsert(trip.clone());
    world.trip_id = Some(trip.id);
}

#[when("I open the trip dashboard")]
async fn when_open_dashboard(world: &mut AppWorld) {
    let state = world.app_state().clone();
    let user_uuid = world.user_uuid();
    let trip_id = world.trip_id();
    let dashboard = world.dashboard();
    dashboard.refresh(&state.remote, &state.cache, &user_uuid).await;
    dashboard
        .select(&state.sync, &trip_id)
        .await
        .expect("select trip");
}

#[when(regex = r#"^I log an expense \"([^\"]+)\" costing (\d+(?:\.\d+)?) in \"([^\"]+)\"$"#)]
async fn when_log_expense(world: &mut AppWorld, name: String, cost: f64, city: String) {
    let state = world.app_state().clone();
    let view = world
        .dashboard()
        .add_expense(&state.sync, &name, cost, &city)
        .await
        .expect("expense accepted");
    assert!(view.is_some(), "non-blank expense must update the view");
}

#[then(regex = r#"^logging an expense \"([^\"]+)\" costing (\d+(?:\.\d+)?) in \"([^\"]+)\" is rejected$"#)]
async fn then_expense_rejected(world: &mut AppWorld, name: String, cost: f64, city: String) {
    let state = world.app_state().clone();
    let result = world
        .dashboard()
        .add_expense(&state.sync, &name, cost, &city)
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[then(regex = r"^the current view shows (\d+) expenses and (\d+(?:\.\d+)?) spent$")]
async fn then_view_shows(world: &mut AppWorld, count: usize, spent: f64) {
    let dashboard = world.dashboard();
    wait_until(|| {
        let view = dashboard.view();
        view.expenses.len() == count && (view.totals.spent - spent).abs() < 1e-9
    })
    .await;
}

#[then(regex = r"^the remote store holds (\d+) expenses for the trip$")]
async fn then_remote_holds(world: &mut AppWorld, count: usize) {
    let state = world.app_state().clone();
    let trip_id = world.trip_id();
    // The remote write behind an optimistic add is fire and forget.
    for _ in 0..200 {
        let stored = state
            .remote
            .expenses_for_trip(&trip_id)
            .await
            .expect("list expenses");
        if stored.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("remote store never reached {count} expenses");
}

#[when(regex = r"^the remote store publishes expenses of (\d+(?:\.\d+)?) and (\d+(?:\.\d+)?)$")]
async fn when_remote_publishes(world: &mut AppWorld, first: f64, second: f64) {
    let state = world.app_state().clone();
    let trip_id = world.trip_id();
    for cost in [first, second] {
        let expense =
            fairfare::models::expense::Expense::new(&trip_id, "Remote item", cost, "Elsewhere");
        state
            .remote
            .write(&trip_id, &expense)
            .await
            .expect("remote write");
    }
}

#[when("I complete the trip")]
async fn when_complete_trip(world: &mut AppWorld) {
    let state = world.app_state().clone();
    let trip_id = world.trip_id();
    let trip = world
        .dashboard()
        .complete(&state.remote, &trip_id)
        .expect("complete trip");
    assert_eq!(trip.status, TripStatus::Completed);
}

#[then("the remote store marks the trip completed")]
async fn then_remote_completed(world: &mut AppWorld) {
    let state = world.app_state().clone();
    let trip_id = world.trip_id();
    for _ in 0..200 {
        let trip = state
            .remote
            .get_trip(&trip_id)
            .await
            .expect("get trip")
            .expect("trip exists");
        if trip.status == TripStatus::Completed {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("remote store never marked the trip completed");
}

#[when("I delete the trip")]
async fn when_delete_trip(world: &mut AppWorld) {
    let state = world.app_state().clone();
    let user_uuid = world.user_uuid();
    let trip_id = world.trip_id();
    world
        .dashboard()
        .delete(&state.sync, &state.remote, &user_uuid, &trip_id)
        .await
        .expect("delete trip");
}

#[then(regex = r"^the dashboard has no trips and a budget of (\d+(?:\.\d+)?)$")]
async fn then_dashboard_empty(world: &mut AppWorld, budget: f64) {
    let dashboard = world.dashboard();
    assert!(dashboard.registry.is_empty());
    let view = dashboard.view();
    assert_eq!(view.budget, budget);
    assert_eq!(view.budget, DEFAULT_BUDGET);
    assert!(view.expenses.is_empty());
}

#[then(regex = r"^total savings come to (\d+(?:\.\d+)?)$")]
async fn then_savings(world: &mut AppWorld, expected: f64) {
    let state = world.app_state().clone();
    let user_uuid = world.user_uuid();
    // Savings derive from the remote remaining-budget column, which the
    // fire-and-forget expense write maintains.
    for _ in 0..200 {
        let trips = state
            .remote
            .trips_for_user(&user_uuid)
            .await
            .expect("list trips");
        let savings = fairfare::budget::compute_savings(&trips);
        if (savings - expected).abs() < 1e-9 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("savings never reached {expected}");
}

async fn register_user(world: &mut AppWorld, username: String, email: String, password: String) {
    let created = auth::register_user(&world.app_state().db, &username, &email, &password)
        .await
        .expect("register user");
    world.registered_user = Some(AuthenticatedUser {
        id: created.id,
        uuid: created.uuid,
        username: created.username,
        email: created.email,
    });
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
