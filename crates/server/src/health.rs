//! `GET /health`: database readiness plus the number of live chat sessions.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use regdesk_agent::SessionStore;
use regdesk_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    sessions: Arc<dyn SessionStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub database: Readiness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, sessions: Arc<dyn SessionStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, sessions })
}

/// Chat sessions do not affect readiness; the oracle is not probed here.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database_error =
        regdesk_db::ping(&state.db_pool).await.err().map(|error| error.to_string());
    if let Some(error) = &database_error {
        warn!(
            event_name = "system.health.degraded",
            correlation_id = "health",
            error = %error,
            "database probe failed"
        );
    }

    let database = if database_error.is_none() { Readiness::Ready } else { Readiness::Degraded };
    let status_code =
        if database == Readiness::Ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let payload = HealthResponse {
        status: database.clone(),
        database,
        database_error,
        active_sessions: state.sessions.len().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{extract::State, http::StatusCode, Json};
    use regdesk_agent::session::Session;
    use regdesk_agent::{InMemorySessionStore, SessionId, SessionStore};
    use regdesk_db::connect_with_settings;

    use crate::health::{health, HealthState, Readiness};

    fn sessions() -> Arc<InMemorySessionStore> {
        Arc::new(InMemorySessionStore::new(Duration::from_secs(60), 10))
    }

    #[tokio::test]
    async fn ready_when_database_answers() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let sessions = sessions();
        sessions.put(Session::new(SessionId::from("abc"))).await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), sessions })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, Readiness::Ready);
        assert_eq!(payload.database_error, None);
        assert_eq!(payload.active_sessions, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn degraded_when_the_pool_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, sessions: sessions() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, Readiness::Degraded);
        assert_eq!(payload.database, Readiness::Degraded);
        assert!(payload.database_error.is_some());
    }
}
