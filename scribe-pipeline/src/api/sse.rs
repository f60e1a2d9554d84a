//! Server-Sent Events (SSE) for job lifecycle streaming
//!
//! Streams every `ScribeEvent` published by the Stage Runner:
//! - JobCreated
//! - JobUpdated (stage entered or checkpoint reached)
//! - JobProcessed
//! - JobFailed
//!
//! Idle connections are kept open by the `KeepAlive` comment only.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use scribe_common::events::ScribeEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

const HEARTBEAT: Duration = Duration::from_secs(15);

/// GET /jobs/events
pub async fn job_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to job events");

    let stream = job_events(state.event_bus.subscribe());

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}

/// One SSE event per bus event; ends when the bus closes
fn job_events(
    mut rx: broadcast::Receiver<ScribeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting job event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: Client lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE: Event bus closed, ending stream");
                    break;
                }
            }
        }
    }
}
