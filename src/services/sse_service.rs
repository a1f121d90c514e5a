use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{dto::events::EventEnvelope, error::ServiceError, state::SharedState};

/// Subscribe to the events of a live room.
pub fn subscribe_room(
    state: &SharedState,
    room_id: Uuid,
) -> Result<broadcast::Receiver<EventEnvelope>, ServiceError> {
    state.room(room_id)?;
    Ok(state.events().subscribe())
}

/// Render an envelope as an SSE frame keyed by its idempotency id.
pub fn to_sse_event(envelope: &EventEnvelope) -> Option<Event> {
    match Event::default().json_data(envelope) {
        Ok(event) => Some(event.id(envelope.event_id()).event(envelope.event.name())),
        Err(err) => {
            warn!(error = %err, "failed to serialize battle event");
            None
        }
    }
}

/// Convert a broadcast receiver into an SSE response carrying the events of `room_id`,
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<EventEnvelope>,
    room_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(envelope) if envelope.room_id == room_id => {
                            let Some(event) = to_sse_event(&envelope) else {
                                continue;
                            };
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Clients resync from GET /rooms/{id}.
                            warn!(room_id = %room_id, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(room_id = %room_id, "room SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
