use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::EventEnvelope,
        ws::{Identification, PlayerInboundMessage, PlayerOutboundMessage},
    },
    error::ServiceError,
    services::{answer_service, room_service, round_controller},
    state::{PlayerConnection, SharedState},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while serving one player socket.
#[derive(Debug, Error)]
enum CommandError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
    /// The command was refused by the room.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

/// Handle the full lifecycle of a player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let identification = match PlayerInboundMessage::from_json_str(&initial_message) {
        Ok(PlayerInboundMessage::Identification(identification)) => identification,
        Ok(_) => {
            warn!("first message was not identification");
            reject(&outbound_tx, "identification_required", "identify before sending commands");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse or validate identification");
            reject(&outbound_tx, "invalid_message", &err.to_string());
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Identification {
        room_id,
        user_id,
        display_name,
    } = identification;

    // Subscribe before the snapshot so nothing committed after it is missed.
    let events = state.events().subscribe();
    let (snapshot, reconnected) =
        match room_service::connect_player(&state, room_id, &user_id, &display_name).await {
            Ok(joined) => joined,
            Err(err) => {
                match &err {
                    ServiceError::Battle(battle) if battle.is_join_refusal() => {
                        info!(room_id = %room_id, user_id = %user_id, code = battle.code(), "cannot join room");
                    }
                    _ => warn!(room_id = %room_id, user_id = %user_id, error = %err, "player refused"),
                }
                let _ = report_error(&outbound_tx, &err);
                let _ = outbound_tx.send(Message::Close(None));
                finalize(writer_task, outbound_tx).await;
                return;
            }
        };

    let connection_id = Uuid::new_v4();
    state.connections().insert(
        (room_id, user_id.clone()),
        PlayerConnection {
            connection_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(room_id = %room_id, user_id = %user_id, reconnected, "player socket attached");

    let joined = PlayerOutboundMessage::Joined {
        user_id: user_id.clone(),
        reconnected,
        snapshot,
    };
    let forwarder = if send_message_to_websocket(&outbound_tx, &joined).is_ok() {
        Some(spawn_event_forwarder(events, room_id, outbound_tx.clone()))
    } else {
        None
    };

    let mut left = false;
    while forwarder.is_some() {
        let Some(message) = receiver.next().await else {
            break;
        };
        match message {
            Ok(Message::Text(text)) => {
                debug!(room_id = %room_id, user_id = %user_id, payload = %text, "received player message");

                let outcome = match PlayerInboundMessage::from_json_str(&text) {
                    Ok(command) => dispatch(&state, room_id, &user_id, command).await,
                    Err(err) => {
                        warn!(room_id = %room_id, user_id = %user_id, error = %err, "failed to parse player message");
                        Ok(true)
                    }
                };

                match outcome {
                    Ok(true) => {}
                    Ok(false) => {
                        left = true;
                        let _ = outbound_tx.send(Message::Close(None));
                        break;
                    }
                    Err(CommandError::ConnectionClosed) => break,
                    Err(CommandError::Service(err)) => {
                        if report_error(&outbound_tx, &err).is_err() {
                            info!(room_id = %room_id, user_id = %user_id, "connection closed while reporting an error");
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(room_id = %room_id, user_id = %user_id, "player closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(room_id = %room_id, user_id = %user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }

    // A newer socket may already own this seat; only the current one reports the drop.
    let current = state
        .connections()
        .remove_if(&(room_id, user_id.clone()), |_, connection| {
            connection.connection_id == connection_id
        })
        .is_some();
    if current && !left {
        if let Err(err) = room_service::set_connection(&state, room_id, &user_id, false).await {
            debug!(room_id = %room_id, user_id = %user_id, error = %err, "disconnect not recorded");
        }
    }
    info!(room_id = %room_id, user_id = %user_id, "player socket detached");

    finalize(writer_task, outbound_tx).await;
}

/// Run one player command. `Ok(false)` asks the caller to close the socket.
async fn dispatch(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
    command: PlayerInboundMessage,
) -> Result<bool, CommandError> {
    match command {
        PlayerInboundMessage::Identification(_) => {
            warn!(room_id = %room_id, user_id = %user_id, "ignoring duplicate identification message");
        }
        PlayerInboundMessage::SetReady { ready } => {
            room_service::set_ready(state, room_id, user_id, ready).await?;
        }
        PlayerInboundMessage::SubmitAnswer {
            question_id,
            selected_index,
            client_offset_ms,
        } => {
            answer_service::submit_answer(
                state,
                room_id,
                user_id,
                &question_id,
                selected_index,
                client_offset_ms,
            )
            .await?;
        }
        PlayerInboundMessage::HostAdvance => {
            round_controller::host_advance(state, room_id, user_id).await?;
        }
        PlayerInboundMessage::Leave => {
            room_service::leave(state, room_id, user_id).await?;
            return Ok(false);
        }
        PlayerInboundMessage::Unknown => {
            warn!(room_id = %room_id, user_id = %user_id, "ignoring unknown message type");
        }
    }
    Ok(true)
}

/// Forward the room's events to the socket until the writer closes.
fn spawn_event_forwarder(
    mut receiver: broadcast::Receiver<EventEnvelope>,
    room_id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(envelope) if envelope.room_id == room_id => {
                    let message = PlayerOutboundMessage::Event(envelope);
                    if send_message_to_websocket(&tx, &message).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room_id = %room_id, skipped, "player socket lagged behind room events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Send client-visible refusals back to the originating socket. Stale transitions and
/// internal failures are dropped.
fn report_error(
    tx: &mpsc::UnboundedSender<Message>,
    err: &ServiceError,
) -> Result<(), CommandError> {
    match err {
        ServiceError::Battle(battle) if battle.is_client_visible() => send_message_to_websocket(
            tx,
            &PlayerOutboundMessage::Error {
                code: battle.code().to_string(),
                message: battle.to_string(),
            },
        ),
        ServiceError::Battle(battle) => {
            debug!(error = %battle, "discarding stale command");
            Ok(())
        }
        other => {
            warn!(error = %other, "player command failed");
            Ok(())
        }
    }
}

fn reject(tx: &mpsc::UnboundedSender<Message>, code: &str, message: &str) {
    let _ = send_message_to_websocket(
        tx,
        &PlayerOutboundMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    );
    let _ = tx.send(Message::Close(None));
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; a closed writer is reported as
/// [`CommandError::ConnectionClosed`].
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), CommandError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| CommandError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
