use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use transmute_core::MAX_BATCH_SIZE;

use super::middleware::{cors_layer, metrics_middleware, rate_limit_middleware, tracing_layer};
use super::{batch, conversions, handlers, uploads};
use crate::state::AppState;

/// Room for multipart framing on top of the file bytes.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // A full batch of maximum-size files must fit; per-file limits are
    // enforced while streaming.
    let body_limit = (state.config().storage.max_upload_bytes() as usize)
        .saturating_mul(MAX_BATCH_SIZE)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    // API routes
    let api_routes = Router::new()
        // Health, config, and formats
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/formats", get(handlers::formats))
        // Uploads
        .route("/uploads", post(uploads::upload))
        // Conversions
        .route("/conversions", get(conversions::list_conversions))
        .route(
            "/conversions/{id}",
            get(conversions::get_conversion).delete(conversions::delete_conversion),
        )
        .route("/conversions/{id}/convert", post(conversions::convert))
        .route(
            "/conversions/{id}/operations/{name}",
            post(conversions::run_operation),
        )
        .route("/conversions/{id}/download", get(conversions::download))
        // Batches
        .route("/batch/upload", post(batch::upload))
        .route("/batch/convert", post(batch::convert))
        .route("/batch/status", post(batch::status))
        .route("/batch/download-zip", post(batch::download_zip));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tracing_layer())
        .layer(cors_layer(&state.config().cors))
        .with_state(state)
}
