//! Server-sent-events feed of the session event stream

use crate::api::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

/// `GET /api/v1/events`
///
/// Each session event is one SSE message whose event name is the
/// variant's type tag. Slow subscribers that fall behind the broadcast
/// buffer miss events rather than stalling the feed.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
            Err(e) => {
                warn!("failed to serialize session event: {}", e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!("SSE subscriber lagged, dropped {} events", missed);
            None
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
