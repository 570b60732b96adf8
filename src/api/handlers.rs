//! REST handlers

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::events::TeardownReason;
use crate::gateway::{ChannelId, CommunityId, UserId};
use crate::session::PresenceUpdate;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub community_id: CommunityId,
    pub user_id: UserId,
}

/// `POST /api/v1/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse> {
    let record = state.registry.create(req.community_id, req.user_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `DELETE /api/v1/sessions/:queue_key`
pub async fn close_session(
    State(state): State<AppState>,
    Path(queue_key): Path<Uuid>,
) -> Result<StatusCode> {
    if state.registry.destroy(queue_key, TeardownReason::Closed).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(queue_key.to_string()))
    }
}

/// Who a command is from and where they are sitting
#[derive(Deserialize)]
pub struct CommandTarget {
    pub community_id: CommunityId,
    pub user_id: UserId,
    /// Voice channel the caller currently occupies, if any; used as a
    /// routing fallback for non-owners
    #[serde(default)]
    pub voice_channel: Option<ChannelId>,
}

#[derive(Deserialize)]
pub struct PlayRequest {
    #[serde(flatten)]
    pub target: CommandTarget,
    pub query: String,
}

/// `POST /api/v1/commands/play`
///
/// 200 with the enqueued title and position; 204 when the session was
/// destroyed while the track was still resolving.
pub async fn play(
    State(state): State<AppState>,
    Json(req): Json<PlayRequest>,
) -> Result<Response> {
    let outcome = state
        .registry
        .play(
            req.target.community_id,
            req.target.user_id,
            req.target.voice_channel,
            &req.query,
        )
        .await?;
    Ok(match outcome {
        Some(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// `POST /api/v1/commands/skip`
pub async fn skip(
    State(state): State<AppState>,
    Json(target): Json<CommandTarget>,
) -> Result<StatusCode> {
    state
        .registry
        .skip(target.community_id, target.user_id, target.voice_channel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/commands/stop`
pub async fn stop(
    State(state): State<AppState>,
    Json(target): Json<CommandTarget>,
) -> Result<StatusCode> {
    state
        .registry
        .stop(target.community_id, target.user_id, target.voice_channel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/commands/pause`
pub async fn pause(
    State(state): State<AppState>,
    Json(target): Json<CommandTarget>,
) -> Result<StatusCode> {
    state
        .registry
        .pause(target.community_id, target.user_id, target.voice_channel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/commands/resume`
pub async fn resume(
    State(state): State<AppState>,
    Json(target): Json<CommandTarget>,
) -> Result<StatusCode> {
    state
        .registry
        .resume(target.community_id, target.user_id, target.voice_channel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/commands/queue`
pub async fn queue(
    State(state): State<AppState>,
    Query(target): Query<CommandTarget>,
) -> Result<impl IntoResponse> {
    let snapshot = state
        .registry
        .queue_snapshot(target.community_id, target.user_id, target.voice_channel)
        .await?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
pub struct IntakeRequest {
    pub user_id: UserId,
    pub content: String,
}

/// `POST /api/v1/intake/:text_channel`
///
/// 202 when the message entered the intake window; 410 when the window
/// has already closed.
pub async fn intake(
    State(state): State<AppState>,
    Path(text_channel): Path<ChannelId>,
    Json(req): Json<IntakeRequest>,
) -> Result<StatusCode> {
    if state
        .registry
        .submit_intake(text_channel, req.user_id, req.content)
        .await?
    {
        Ok(StatusCode::ACCEPTED)
    } else {
        Ok(StatusCode::GONE)
    }
}

/// `POST /api/v1/presence`
pub async fn presence(
    State(state): State<AppState>,
    Json(update): Json<PresenceUpdate>,
) -> StatusCode {
    state.reaper.handle_presence(update).await;
    StatusCode::NO_CONTENT
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_sessions": state.registry.active_sessions().await,
        "capacity": state.registry.capacity(),
    }))
}
