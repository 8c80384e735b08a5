use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use regdesk_agent::actions::registration_actions;
use regdesk_agent::{
    DialogueOrchestrator, GuardrailPolicy, InMemorySessionStore, OllamaOracle, OracleError,
    SessionStore,
};
use regdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use regdesk_db::{connect_with_settings, migrations, DbPool, RegistrationStore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{chat, health, users};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: RegistrationStore,
    pub sessions: Arc<dyn SessionStore>,
    pub orchestrator: Arc<DialogueOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("reasoning oracle setup failed: {0}")]
    Oracle(#[from] OracleError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = RegistrationStore::sql(db_pool.clone());
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(
        Duration::from_secs(config.session.ttl_secs),
        config.session.max_sessions,
    ));
    let oracle = OllamaOracle::from_config(&config.llm)?;
    info!(
        event_name = "system.bootstrap.oracle_configured",
        correlation_id = "bootstrap",
        model = oracle.model(),
        "reasoning oracle configured"
    );

    let orchestrator = DialogueOrchestrator::new(
        Arc::new(oracle),
        registration_actions(store.clone(), GuardrailPolicy::default()),
        Arc::clone(&sessions),
    )
    .with_oracle_timeout(Duration::from_secs(config.llm.timeout_secs));

    Ok(Application { config, db_pool, store, sessions, orchestrator: Arc::new(orchestrator) })
}

impl Application {
    pub fn router(&self) -> Router {
        app_router(self.db_pool.clone(), self.store.clone(), Arc::clone(&self.orchestrator))
    }

    pub fn spawn_session_purge(&self) -> JoinHandle<()> {
        spawn_session_purge(
            Arc::clone(&self.sessions),
            Duration::from_secs(self.config.session.purge_interval_secs),
        )
    }
}

pub fn app_router(
    db_pool: DbPool,
    store: RegistrationStore,
    orchestrator: Arc<DialogueOrchestrator>,
) -> Router {
    Router::new()
        .merge(health::router(db_pool, Arc::clone(orchestrator.sessions())))
        .merge(users::router(store))
        .merge(chat::router(orchestrator))
}

/// Periodically drops idle sessions so they do not wait for the next lookup.
pub fn spawn_session_purge(sessions: Arc<dyn SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired().await;
            if purged > 0 {
                debug!(event_name = "system.sessions.purged", purged, "expired sessions purged");
            }
        }
    })
}
