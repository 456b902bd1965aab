use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::context::AppContext;

/// GET /health
pub async fn health_check(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": ctx.sessions.len(),
    }))
}
