use axum::{extract::State, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

/// GET /health
///
/// Liveness plus a pool capacity snapshot. Never fails the request: a
/// degraded dependency is reported in the body, not as an error status.
pub async fn health_get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pools = state.pools.stats().await;
    Json(json!({
        "status": "ok",
        "pools": {
            "entries": pools.entries,
            "allocated": pools.allocated,
            "ceiling": pools.ceiling,
        },
    }))
}
