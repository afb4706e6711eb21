//! Health check endpoints.
//!
//! `/health` answers as long as the process is serving; `/ready` also probes the
//! ledger and counter store so a load balancer stops routing while either is down.

use crate::server::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use boxoffice_core::BoxFuture;
use boxoffice_postgres::PostgresOrderLedger;
use boxoffice_redis::RedisCounterStore;
use serde::Serialize;

/// Probes the backends the service cannot work without.
pub trait ReadinessCheck: Send + Sync {
    /// `Err` names the first backend that did not answer.
    fn check(&self) -> BoxFuture<'_, Result<(), String>>;
}

/// Readiness over the `PostgreSQL` ledger and the `Redis` counter store.
#[derive(Clone)]
pub struct BackendReadiness {
    ledger: PostgresOrderLedger,
    counters: RedisCounterStore,
}

impl BackendReadiness {
    /// Probe `ledger` and `counters`.
    #[must_use]
    pub const fn new(ledger: PostgresOrderLedger, counters: RedisCounterStore) -> Self {
        Self { ledger, counters }
    }

    async fn probe(&self) -> Result<(), String> {
        sqlx::query("SELECT 1")
            .execute(self.ledger.pool())
            .await
            .map_err(|e| format!("postgres: {e}"))?;
        self.counters
            .ping()
            .await
            .map_err(|e| format!("redis: {e}"))?;
        Ok(())
    }
}

impl ReadinessCheck for BackendReadiness {
    fn check(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(self.probe())
    }
}

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` or `unavailable`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Failing backend, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness.
///
/// ```text
/// GET /health -> 200 {"status": "ok", "version": "..."}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        error: None,
    })
}

/// Readiness.
///
/// ```text
/// GET /ready -> 200 {"status": "ok"} | 503 {"status": "unavailable", "error": "..."}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.readiness.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                error: None,
            }),
        ),
        Err(error) => {
            tracing::warn!(%error, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    error: Some(error),
                }),
            )
        }
    }
}
