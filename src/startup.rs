use crate::config::Config;
use crate::db::{self, DbPool, PgCatalog, PgCounterStore, PgLedger};
use crate::engine::{VoteEngine, spawn_reconciler};
use crate::error::{ConfigError, StartupError};
use crate::hub::Hub;
use crate::live::{poll_results_sse, poll_results_ws};
use crate::polls::{create_poll, get_poll, vote_on_poll};
use crate::store::{
    CounterStore, Ledger, MemoryCatalog, MemoryCounterStore, MemoryLedger, PollCatalog,
};
use axum::{
    Router,
    extract::Extension,
    http::{
        StatusCode,
        header::{ACCEPT, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use tower_cookies::{CookieManagerLayer, Key};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<VoteEngine>,
    pub catalog: Arc<dyn PollCatalog>,
    pub counters: Arc<dyn CounterStore>,
    pub cookie_key: Key,
}

impl AppState {
    /// Wires the engine to its collaborators and starts the reconciler.
    /// Must be called inside a tokio runtime.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        counters: Arc<dyn CounterStore>,
        catalog: Arc<dyn PollCatalog>,
        hub: Hub,
        cookie_key: Key,
    ) -> Self {
        let (escalations_tx, escalations_rx) = mpsc::unbounded_channel();
        let engine =
            Arc::new(VoteEngine::new(ledger, counters.clone(), hub).with_escalation(escalations_tx));
        spawn_reconciler(engine.clone(), escalations_rx);

        AppState {
            engine,
            catalog,
            counters,
            cookie_key,
        }
    }

    pub fn in_memory(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCounterStore::new(true)),
            Arc::new(MemoryCatalog::new()),
            Hub::new(config.subscriber_buffer),
            cookie_key(config)?,
        ))
    }

    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let Some(database_url) = config.database_url.as_deref() else {
            info!("DATABASE_URL not set, keeping votes in memory");
            return Ok(Self::in_memory(config)?);
        };

        let pool = db::init_db(database_url).await?;
        info!("{}", db::pool_stats(&pool));
        spawn_health_check(pool.clone());

        Ok(Self::new(
            Arc::new(PgLedger::new(pool.clone())),
            Arc::new(PgCounterStore::new(pool.clone(), true)),
            Arc::new(PgCatalog::new(pool)),
            Hub::new(config.subscriber_buffer),
            cookie_key(config)?,
        ))
    }
}

fn cookie_key(config: &Config) -> Result<Key, ConfigError> {
    match &config.cookie_secret {
        Some(secret) => {
            Key::try_from(secret.as_slice()).map_err(|_| ConfigError::CookieSecretTooShort)
        }
        None => {
            info!("COOKIE_SECRET not set, session cookies will not survive a restart");
            Ok(Key::generate())
        }
    }
}

fn spawn_health_check(pool: DbPool) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match pool.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", db::pool_stats(&pool));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    });
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/polls", post(create_poll))
        .route("/polls/:poll_id", get(get_poll))
        .route("/polls/:poll_id/votes", post(vote_on_poll))
        .route("/polls/:poll_id/results", get(poll_results_ws))
        .route("/polls/:poll_id/results/sse", get(poll_results_sse))
        .layer(Extension(app_state))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([
                    axum::http::Method::POST,
                    axum::http::Method::GET,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE, ACCEPT]),
        )
        .fallback(handler_404)
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
