pub mod appresult;
pub mod auth;
pub mod chat;
pub mod config;
pub mod connection;
pub mod db;
pub mod delivery;
pub mod index;
pub mod presence;
pub mod res;
pub mod session;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};
use sqlx::SqlitePool;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult, RequestError};

use config::Settings;
use db::SqliteStore;
use delivery::DeliveryRouter;
use presence::PresenceRegistry;
use store::PresenceFlags;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub presence: PresenceRegistry,
    pub presence_flags: Arc<dyn PresenceFlags>,
    pub delivery: DeliveryRouter,
    pub settings: Arc<Settings>,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
    /// Every live connection session, so shutdown can wait for their close.
    pub sessions: TaskTracker,
}

impl AppState {
    /// Wire the core around one pool. The registry starts empty on every boot.
    pub fn new(db_pool: SqlitePool, settings: Settings) -> Self {
        let store = SqliteStore::new(db_pool.clone());
        let presence = PresenceRegistry::new();
        let delivery = DeliveryRouter::new(
            Arc::new(store.clone()),
            presence.clone(),
            settings.push_timeout,
        );

        AppState {
            db_pool,
            presence,
            presence_flags: Arc::new(store),
            delivery,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }
}

pub fn app(app_state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(app_state.settings.session_ttl));

    Router::new()
        .route("/", get(index::index))
        .merge(res::router())
        .nest("/auth", auth::router())
        .nest("/chat", chat::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
