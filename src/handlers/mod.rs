pub mod jobs;
pub mod public;

use axum::{extract::State, Json};
use serde_json::json;

use crate::AppState;

/// Liveness + database reachability.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok = crate::database::health_check(&state.pool).await;
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
    }))
}
