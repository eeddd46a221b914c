//! Server-Sent Events for job, export and session changes

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every `RusleEvent`:
/// - JobSubmitted
/// - JobStateChanged
/// - ExportStateChanged
/// - SessionCreated / SessionRemoved
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    rusle_common::sse::event_bus_sse_stream("rusle-sl", &state.event_bus)
}
