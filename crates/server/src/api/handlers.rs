use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use transmute_core::{Category, SanitizedConfig};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Supported formats and the operations that can be run on any upload.
#[derive(Debug, Serialize)]
pub struct FormatsResponse {
    pub formats: BTreeMap<Category, BTreeSet<String>>,
    pub operations: Vec<String>,
}

pub async fn formats(State(state): State<Arc<AppState>>) -> Json<FormatsResponse> {
    let service = state.service();
    Json(FormatsResponse {
        formats: service.supported_formats(),
        operations: service.dispatch().operation_names(),
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        encode_metrics(),
    )
}
