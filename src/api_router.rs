//! API Router
//!
//! Combines the API endpoints from all modules into a unified router.

use axum::{routing::get, Json, Router};
use std::sync::Arc;

use crate::shared::state::AppState;

/// Configure all API routes from all modules
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    let router = Router::new().route("/health", get(handle_health));
    crate::learn::configure(router)
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(
        serde_json::json!({"status": "healthy", "timestamp": chrono::Utc::now().to_rfc3339()}),
    )
}
