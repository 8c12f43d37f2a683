//! HTTP routes for the presence queries.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use tokio::task;

use crate::{QueryService, Result, SensorActivity, SessionHistory};

/// Routes: `GET /` for latest activity and `GET /sessions` for session
/// history over the trailing window.
pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/", get(latest_activity))
        .route("/sessions", get(session_history))
        .with_state(service)
}

// Recorder reads may block on the database, so they run on the blocking pool.

async fn latest_activity(
    State(service): State<Arc<QueryService>>,
) -> Result<Json<Vec<SensorActivity>>> {
    let views = task::spawn_blocking(move || service.latest_activity()).await??;
    Ok(Json(views))
}

async fn session_history(
    State(service): State<Arc<QueryService>>,
) -> Result<Json<Vec<SessionHistory>>> {
    let now = Utc::now();
    let views = task::spawn_blocking(move || service.session_history(now)).await??;
    Ok(Json(views))
}
