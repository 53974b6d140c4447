//! Dashboard query API.
//!
//! Read-only JSON endpoints over the in-memory store, plus the ingest
//! route and a liveness probe. The dashboard web UI is a pure consumer of
//! these endpoints.

use crate::backup::BackupSink;
use crate::ingest::ingest_logs;
use crate::store::{EventQuery, EventStore};
use argus_core::types::{EventFlag, EventSource, Severity};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_WINDOW_HOURS: i64 = 24;
const DEFAULT_EVENT_LIMIT: usize = 100;
const DEFAULT_TOP_N: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub api_key: String,
    pub backup: Arc<dyn BackupSink>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/logs/ingest", post(ingest_logs))
        .route("/api/dashboard/summary", get(summary))
        .route("/api/dashboard/devices", get(devices))
        .route("/api/dashboard/alerts", get(alerts))
        .route("/api/dashboard/file-events", get(file_events))
        .route("/api/dashboard/network-events", get(network_events))
        .route("/api/dashboard/app-usage", get(app_usage))
        .route("/api/dashboard/transfers", get(transfers))
        .route("/api/dashboard/top-talkers", get(top_talkers))
        .route("/api/health", get(health))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardParams {
    hours: Option<i64>,
    limit: Option<usize>,
    device_id: Option<String>,
    flag: Option<String>,
    severity: Option<String>,
    source: Option<String>,
}

impl DashboardParams {
    fn window_hours(&self) -> i64 {
        self.hours.filter(|h| *h > 0).unwrap_or(DEFAULT_WINDOW_HOURS)
    }

    fn to_query(&self, default_limit: usize) -> Result<EventQuery, String> {
        let flag = match self.flag.as_deref() {
            Some(raw) => Some(
                raw.parse::<EventFlag>()
                    .map_err(|_| format!("unknown flag '{}'", raw))?,
            ),
            None => None,
        };
        let source = match self.source.as_deref() {
            Some(raw) => Some(
                raw.parse::<EventSource>()
                    .map_err(|_| format!("unknown source '{}'", raw))?,
            ),
            None => None,
        };
        let severity = match self.severity.as_deref() {
            Some(raw) => Some(
                raw.parse::<Severity>()
                    .map_err(|_| format!("unknown severity '{}'", raw))?,
            ),
            None => None,
        };
        Ok(EventQuery {
            cutoff: Some(Utc::now() - Duration::hours(self.window_hours())),
            device_id: self.device_id.clone(),
            flag,
            source,
            severity,
            limit: self.limit.unwrap_or(default_limit),
        })
    }
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "healthy": true,
        "devices": state.store.device_count(),
        "batchesCommitted": state.store.batches_committed(),
        "eventsCommitted": state.store.events_committed(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn summary(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> impl IntoResponse {
    let hours = params.window_hours();
    let cutoff = Utc::now() - Duration::hours(hours);
    let store = &state.store;

    Json(serde_json::json!({
        "windowHours": hours,
        "devices": store.device_count(),
        "fileEvents": store.count_file_events(cutoff),
        "networkEvents": store.count_network_events(cutoff),
        "alerts": store.count_alerts(cutoff, None),
        "criticalAlerts": store.count_alerts(cutoff, Some(Severity::Critical)),
        "topProcesses": store.top_processes(cutoff, DEFAULT_TOP_N),
        "topApplications": store.top_apps(cutoff, DEFAULT_TOP_N),
        "topTalkers": store.top_talkers(cutoff, DEFAULT_TOP_N),
    }))
}

async fn devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.devices())
}

async fn alerts(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> axum::response::Response {
    match params.to_query(DEFAULT_EVENT_LIMIT) {
        Ok(query) => Json(state.store.alerts(&query)).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn file_events(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> axum::response::Response {
    match params.to_query(DEFAULT_EVENT_LIMIT) {
        Ok(query) => Json(state.store.file_events(&query)).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn network_events(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> axum::response::Response {
    match params.to_query(DEFAULT_EVENT_LIMIT) {
        Ok(query) => Json(state.store.network_events(&query)).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn app_usage(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> axum::response::Response {
    match params.to_query(DEFAULT_EVENT_LIMIT) {
        Ok(query) => Json(state.store.app_events(&query)).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn transfers(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> axum::response::Response {
    match params.to_query(DEFAULT_EVENT_LIMIT) {
        Ok(query) => Json(state.store.transfer_events(&query)).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn top_talkers(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> impl IntoResponse {
    let cutoff = Utc::now() - Duration::hours(params.window_hours());
    let n = params.limit.unwrap_or(DEFAULT_TOP_N);
    Json(state.store.top_talkers(cutoff, n))
}
