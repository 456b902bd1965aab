//! Diagnostic endpoints.

use axum::extract::State;
use axum::Json;
use vs_transcode::SessionInfo;

use crate::context::AppContext;

/// GET /debug/sessions
///
/// Live transcoding sessions, ordered by stream and representation.
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<SessionInfo>> {
    Json(ctx.sessions.snapshot())
}
