pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::analysis::handlers as analysis;
use crate::export::handlers as export;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/analyze", post(analysis::handle_analyze))
        .route("/api/usage", get(analysis::handle_usage))
        .route("/api/download", post(export::handle_download))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
