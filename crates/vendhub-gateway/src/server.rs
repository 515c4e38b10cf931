//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vendhub_channels::TelegramBot;
use vendhub_core::config::VendHubConfig;
use vendhub_core::error::{Result, VendHubError};
use vendhub_db::VendDb;
use vendhub_inventory::{InventoryService, MachineService};
use vendhub_notify::{EventHub, Notifier, spawn_dispatcher};
use vendhub_tasks::TaskService;

use crate::auth::{JwtKeys, require_auth};
use crate::users::UserService;
use crate::{bot, routes, ws};

/// Shared state for the gateway server.
pub struct AppState {
    pub config: VendHubConfig,
    pub start_time: Instant,
    pub db: Arc<VendDb>,
    pub hub: EventHub,
    pub jwt: JwtKeys,
    pub users: UserService,
    pub tasks: TaskService,
    pub machines: MachineService,
    pub inventory: InventoryService,
}

impl AppState {
    pub fn new(config: VendHubConfig, db: Arc<VendDb>) -> Self {
        let hub = EventHub::new(config.notify.channel_capacity, config.notify.history_size);
        let low_stock = config.inventory.low_stock_percent;
        Self {
            start_time: Instant::now(),
            jwt: JwtKeys::new(&config.auth.jwt_secret, config.auth.token_ttl_hours),
            users: UserService::new(db.clone()),
            tasks: TaskService::new(db.clone(), hub.clone()).with_low_stock_percent(low_stock),
            machines: MachineService::new(db.clone(), hub.clone()),
            inventory: InventoryService::new(db.clone(), hub.clone(), low_stock),
            hub,
            db,
            config,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    if origins.is_empty() {
        // Development fallback: any origin
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins
            .iter()
            .filter_map(|s| s.parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/me", get(routes::me))
        .route("/api/v1/me/password", put(routes::change_password))
        // Users
        .route("/api/v1/users", get(routes::list_users).post(routes::create_user))
        .route(
            "/api/v1/users/{id}",
            get(routes::get_user).put(routes::update_user).delete(routes::delete_user),
        )
        .route("/api/v1/users/{id}/telegram", put(routes::link_telegram))
        // Machines
        .route("/api/v1/machines", get(routes::list_machines).post(routes::create_machine))
        .route("/api/v1/machines/{id}", get(routes::get_machine))
        .route("/api/v1/machines/{id}/status", put(routes::set_machine_status))
        // Tasks
        .route("/api/v1/tasks", get(routes::list_tasks).post(routes::create_task))
        .route("/api/v1/tasks/stats", get(routes::task_stats))
        .route("/api/v1/tasks/{id}", get(routes::get_task))
        .route("/api/v1/tasks/{id}/assign", post(routes::assign_task))
        .route("/api/v1/tasks/{id}/start", post(routes::start_task))
        .route("/api/v1/tasks/{id}/complete", post(routes::complete_task))
        .route("/api/v1/tasks/{id}/cancel", post(routes::cancel_task))
        .route("/api/v1/tasks/{id}/steps/{position}/complete", post(routes::complete_step))
        .route("/api/v1/tasks/{id}/history", get(routes::task_history))
        // Templates
        .route("/api/v1/templates", get(routes::list_templates).post(routes::create_template))
        .route(
            "/api/v1/templates/{id}",
            get(routes::get_template).delete(routes::delete_template),
        )
        // Bunkers
        .route("/api/v1/bunkers", get(routes::list_bunkers).post(routes::create_bunker))
        .route("/api/v1/bunkers/low-stock", get(routes::low_stock))
        .route("/api/v1/bunkers/{id}", get(routes::get_bunker))
        .route("/api/v1/bunkers/{id}/fill", post(routes::fill_bunker))
        .route("/api/v1/bunkers/{id}/install", post(routes::install_bunker))
        .route("/api/v1/bunkers/{id}/remove", post(routes::remove_bunker))
        .route("/api/v1/bunkers/{id}/weigh", post(routes::weigh_bunker))
        .route("/api/v1/bunkers/{id}/movements", get(routes::bunker_movements))
        // Audit & relay
        .route("/api/v1/action-log", get(routes::action_log))
        .route("/api/v1/notifications", get(routes::notifications))
        .route("/api/v1/rooms", get(routes::rooms))
        .route_layer(axum::middleware::from_fn_with_state(shared.clone(), require_auth));

    // Public routes. The WebSocket authenticates with ?token= itself.
    let public = Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/v1/auth/login", post(routes::login))
        .route("/ws", get(ws::ws_handler));

    protected
        .merge(public)
        .layer(DefaultBodyLimit::max(shared.config.gateway.body_limit_bytes))
        .layer(cors_layer(&shared.config.gateway.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Run the gateway until Ctrl-C: HTTP API, WebSocket relay, and the Telegram
/// bot plus push dispatcher when a bot token is configured.
pub async fn serve(config: VendHubConfig, db: Arc<VendDb>) -> Result<()> {
    let state = Arc::new(AppState::new(config, db));
    let stop = CancellationToken::new();

    if let Some(tg) = state.config.telegram.clone().filter(|_| state.config.telegram_enabled()) {
        let telegram = TelegramBot::new(tg);
        match telegram.get_me().await {
            Ok(me) => tracing::info!("🤖 Telegram bot @{} online", me.username.unwrap_or_default()),
            Err(e) => tracing::warn!("⚠️ Telegram getMe failed: {e}"),
        }
        if state.config.notify.telegram_push {
            let notifier: Arc<dyn Notifier> = Arc::new(telegram.clone());
            spawn_dispatcher(&state.hub, state.db.clone(), notifier, stop.clone());
        }
        tokio::spawn(bot::run_bot(state.clone(), telegram, stop.clone()));
    } else {
        tracing::info!("Telegram bot disabled (no token configured)");
    }

    let app = build_router(state.clone());
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VendHubError::Config(format!("Cannot bind {addr}: {e}")))?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            stop.cancel();
        })
        .await?;
    Ok(())
}

/// Fresh in-memory state for tests.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let db = Arc::new(VendDb::in_memory().unwrap());
    let mut state = AppState::new(VendHubConfig::default(), db.clone());
    state.users = UserService::new(db).with_bcrypt_cost(4);
    state
}
