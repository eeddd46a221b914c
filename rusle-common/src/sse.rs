//! Server-Sent Events (SSE) utilities

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Stream every event published on `event_bus` to one SSE client
///
/// Starts with a `ConnectionStatus` event; lagged subscribers skip the dropped
/// events and keep streaming.
pub fn event_bus_sse_stream(
    service_name: &'static str,
    event_bus: &EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);
    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let name = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Ok(Event::default().event(name).data(data)),
                        Err(e) => warn!("SSE: failed to serialize {}: {}", name, e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
