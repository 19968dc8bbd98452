//! GET /health: liveness, no identity required.

use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "schema_check_server",
    }))
}
