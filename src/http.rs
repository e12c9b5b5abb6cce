//! The HTTP surface: REST endpoints for local consumers plus the `/ws`
//! streaming upgrade.

use crate::alert::{Alert, ProductId};
use crate::hub::Hub;
use crate::nwws::SourceHealth;
use crate::product::{ParseFailure, ParseFailureLog};
use crate::store::{AlertStore, RemoveReason, StoreStats};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    /// The shared active set
    pub store: Arc<AlertStore>,
    /// Diagnostic ring buffer of recent parse failures
    pub parse_failures: Arc<ParseFailureLog>,
    /// Push source health, when the push source is enabled
    pub push_health: Option<Arc<SourceHealth>>,
    /// Pull source health
    pub pull_health: Arc<SourceHealth>,
    /// Side channel for chaser position reports
    pub chaser: mpsc::Sender<serde_json::Value>,
    /// Cascading shutdown signal
    pub shutdown: CancellationToken,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/alerts", get(list_alerts))
        .route(
            "/api/alerts/:product_id",
            get(get_alert).delete(delete_alert),
        )
        .route("/api/stats", get(stats))
        .route("/api/diagnostics/parse-failures", get(parse_failures))
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct AlertsQuery {
    phenomenon: Option<String>,
    state: Option<String>,
    significance: Option<String>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Json<Vec<Alert>> {
    let phenomenon = query.phenomenon.map(|p| p.to_ascii_uppercase());
    let state_code = query.state.map(|s| s.to_ascii_uppercase());
    let significance = query.significance.map(|s| s.to_ascii_uppercase());

    let alerts = state
        .store
        .snapshot()
        .into_iter()
        .filter(|alert| {
            phenomenon
                .as_deref()
                .map_or(true, |p| alert.phenomenon.as_code() == p)
        })
        .filter(|alert| {
            state_code.as_deref().map_or(true, |s| {
                alert.affected_areas.iter().any(|zone| zone.state() == s)
            })
        })
        .filter(|alert| {
            significance
                .as_deref()
                .map_or(true, |s| alert.significance.as_code() == s)
        })
        .collect();
    Json(alerts)
}

async fn get_alert(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Response {
    let Ok(product_id) = product_id.parse::<ProductId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.store.get(&product_id) {
        Some(alert) => Json(alert).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_alert(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Response {
    let Ok(product_id) = product_id.parse::<ProductId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.store.remove(&product_id, RemoveReason::Manual) {
        Some(alert) => {
            info!(%product_id, "alert removed by operator");
            Json(serde_json::json!({
                "removed": alert.product_id,
                "event_name": alert.event_name,
            }))
            .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stats(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.store.stats())
}

async fn parse_failures(State(state): State<AppState>) -> Json<Vec<ParseFailure>> {
    Json(state.parse_failures.recent())
}

#[derive(Debug, Serialize)]
struct SourceStatus {
    enabled: bool,
    connected: bool,
    received: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_alerts: usize,
    subscribers: usize,
    push: SourceStatus,
    pull: SourceStatus,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let push = match &state.push_health {
        Some(health) => SourceStatus {
            enabled: true,
            connected: health.is_connected(),
            received: health.received(),
        },
        None => SourceStatus {
            enabled: false,
            connected: false,
            received: 0,
        },
    };
    Json(HealthResponse {
        status: "ok",
        active_alerts: state.store.stats().total,
        subscribers: state.store.subscriber_count(),
        push,
        pull: SourceStatus {
            enabled: true,
            connected: state.pull_health.is_connected(),
            received: state.pull_health.received(),
        },
    })
}

async fn ws_upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let hub = Hub {
        store: state.store.clone(),
        chaser: state.chaser.clone(),
        shutdown: state.shutdown.clone(),
    };
    upgrade.on_upgrade(move |socket| hub.serve_subscriber(socket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds() {
        let store = Arc::new(AlertStore::new(
            std::time::Duration::from_secs(60),
            crate::hub::SUBSCRIBER_QUEUE_BOUND,
        ));
        let (chaser, _chaser_rx) = mpsc::channel(16);
        let state = AppState {
            store,
            parse_failures: Arc::new(ParseFailureLog::default()),
            push_health: None,
            pull_health: Arc::new(SourceHealth::default()),
            chaser,
            shutdown: CancellationToken::new(),
        };
        let _router = router(state);
    }
}
