//! Liveness check

use axum::Json;
use serde_json::{json, Value};

/// GET /health; answers without touching the tenant store or upstream site
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
