//! HTTP control surface
//!
//! REST endpoints for session lifecycle and playback commands, plus a
//! server-sent-events feed of the session event stream. All routes are
//! versioned under `/api/v1` except the bare health probe.

pub mod handlers;
pub mod sse;

use crate::error::Error;
use crate::events::EventBus;
use crate::session::{Reaper, SessionRegistry};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub reaper: Arc<Reaper>,
    pub events: EventBus,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::DuplicateSession | Error::NothingPlaying => StatusCode::CONFLICT,
            Error::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            Error::NoActiveSession | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Resolution(_) | Error::Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:queue_key", delete(handlers::close_session))
        .route("/commands/play", post(handlers::play))
        .route("/commands/skip", post(handlers::skip))
        .route("/commands/stop", post(handlers::stop))
        .route("/commands/pause", post(handlers::pause))
        .route("/commands/resume", post(handlers::resume))
        .route("/commands/queue", get(handlers::queue))
        .route("/intake/:text_channel", post(handlers::intake))
        .route("/presence", post(handlers::presence))
        .route("/events", get(sse::events));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
