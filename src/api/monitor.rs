//! Live monitor endpoints: record queries and the SSE event feed.

use crate::api::AppState;
use crate::core::Result;
use crate::monitor::CallRecord;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Interval between keep-alive comments on the event feed.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// `GET /api/monitor/records?limit=N`
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<CallRecord>> {
    Json(state.tracker.list(params.limit))
}

/// `GET /api/monitor/records/:id`
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CallRecord>> {
    Ok(Json(state.tracker.get(&id)?))
}

/// `DELETE /api/monitor/records`
pub async fn clear_records(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.tracker.clear();
    Json(json!({"success": true}))
}

/// `GET /api/monitor/events`: every lifecycle event as one SSE message.
///
/// Subscribers that fall behind the broadcast buffer skip the missed events.
pub async fn monitor_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    tracing::debug!(
        subscribers = state.events.subscriber_count() + 1,
        "Monitor subscriber connected"
    );

    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|result| match result {
        Ok(event) => match Event::default().event("monitor_update").json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!("Failed to serialize monitor event: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::debug!("Monitor subscriber lagged: {}", e);
            None
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    )
}
