use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::{
    config::DEFAULT_QUESTION_SET,
    dao::questions::RoomConfig,
    dto::room::{CreateRoomRequest, RoomSnapshot, StandingSummary, StandingsResponse},
    error::{BattleError, ServiceError},
    services::{
        events::broadcast_room_state,
        round_controller::{abandon_locked, schedule_lobby_expiry, start_countdown_if_ready},
    },
    state::{
        SharedState,
        battle::{RoomHandle, RoomRuntime},
        room::{BattleRoom, ConnectionState, Question},
        state_machine::RoundPhase,
    },
};

/// Validate the configuration, resolve the questions and open a room in the lobby.
///
/// The host is seated but marked disconnected until their socket identifies. A lobby
/// nobody attends before the lobby timeout is abandoned.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<RoomSnapshot, ServiceError> {
    let questions: Vec<Question> = match request.questions {
        Some(inline) => inline.into_iter().map(Question::from).collect(),
        None => {
            state
                .questions()
                .get_questions(RoomConfig {
                    question_set: request
                        .question_set
                        .unwrap_or_else(|| DEFAULT_QUESTION_SET.to_string()),
                    question_count: request.question_count,
                })
                .await?
        }
    };

    let mut room = BattleRoom::new(
        request.host_id.clone(),
        request.host_name,
        questions,
        request.max_participants,
    )?;
    room.set_connection(&request.host_id, ConnectionState::Disconnected)?;

    let runtime = RoomRuntime::new(room);
    let room_id = runtime.room.id;
    state.persist_room(&runtime).await;
    broadcast_room_state(state, &runtime);
    let snapshot = RoomSnapshot::from_runtime(&runtime, Instant::now());

    info!(
        room_id = %room_id,
        host_id = %request.host_id,
        question_count = runtime.room.questions.len(),
        max_participants = runtime.room.max_participants,
        "room created"
    );
    state.rooms().insert(room_id, RoomHandle::new(runtime));
    schedule_lobby_expiry(state, room_id);
    Ok(snapshot)
}

/// Seat `user_id`, or reattach them to the seat they already hold.
///
/// Returns the snapshot the player renders from and whether an existing seat was reclaimed.
pub async fn connect_player(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
    display_name: &str,
) -> Result<(RoomSnapshot, bool), ServiceError> {
    let handle = state.room(room_id)?;
    let mut runtime = handle.lock().await;

    let seat_connected = runtime
        .room
        .participants
        .get(user_id)
        .map(|participant| participant.is_connected());

    let reclaimed = match seat_connected {
        // A live seat is a duplicate even when the room is full or started.
        Some(true) => return Err(BattleError::DuplicateParticipant(user_id.to_string()).into()),
        Some(false) => {
            runtime
                .room
                .set_connection(user_id, ConnectionState::Connected)?;
            true
        }
        None => {
            runtime.room.join(user_id, display_name)?;
            false
        }
    };

    info!(
        room_id = %room_id,
        user_id = %user_id,
        reclaimed,
        participants = runtime.room.participants.len(),
        "participant connected"
    );
    state.persist_room(&runtime).await;
    broadcast_room_state(state, &runtime);

    Ok((RoomSnapshot::from_runtime(&runtime, Instant::now()), reclaimed))
}

/// Release a seat before the battle starts.
pub async fn leave(state: &SharedState, room_id: Uuid, user_id: &str) -> Result<(), ServiceError> {
    let handle = state.room(room_id)?;
    let mut runtime = handle.lock().await;
    leave_locked(state, &handle, &mut runtime, user_id).await
}

async fn leave_locked(
    state: &SharedState,
    handle: &Arc<RoomHandle>,
    runtime: &mut RoomRuntime,
    user_id: &str,
) -> Result<(), ServiceError> {
    let outcome = runtime.room.leave(user_id)?;
    info!(
        room_id = %handle.id(),
        user_id = %user_id,
        new_host = outcome.new_host.as_deref().unwrap_or_default(),
        "participant left"
    );

    if outcome.now_empty {
        return abandon_locked(state, handle, runtime, "last participant left").await;
    }

    state.persist_room(runtime).await;
    broadcast_room_state(state, runtime);
    start_countdown_if_ready(state, handle, runtime).await
}

/// Toggle readiness; the last ready flag starts the countdown.
pub async fn set_ready(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
    ready: bool,
) -> Result<(), ServiceError> {
    let handle = state.room(room_id)?;
    let mut runtime = handle.lock().await;

    runtime.room.set_ready(user_id, ready)?;
    info!(room_id = %room_id, user_id = %user_id, ready, "readiness updated");
    state.persist_room(&runtime).await;
    broadcast_room_state(state, &runtime);

    start_countdown_if_ready(state, &handle, &mut runtime).await
}

/// Track a socket attaching or dropping.
///
/// Dropping in the lobby releases the seat. Mid-battle the seat stays and keeps scoring;
/// when nobody is left connected the room is abandoned.
pub async fn set_connection(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
    connected: bool,
) -> Result<(), ServiceError> {
    let handle = state.room(room_id)?;
    let mut runtime = handle.lock().await;
    let phase = runtime.machine.phase();

    if phase.is_terminal() {
        return Ok(());
    }
    if !connected && phase == RoundPhase::Waiting {
        return leave_locked(state, &handle, &mut runtime, user_id).await;
    }

    let connection_state = if connected {
        ConnectionState::Connected
    } else {
        ConnectionState::Disconnected
    };
    if !runtime.room.set_connection(user_id, connection_state)? {
        return Ok(());
    }

    info!(room_id = %room_id, user_id = %user_id, connected, phase = ?phase, "connection state changed");
    state.persist_room(&runtime).await;
    broadcast_room_state(state, &runtime);

    if connected {
        return Ok(());
    }
    if runtime.room.all_disconnected() {
        return abandon_locked(state, &handle, &mut runtime, "all participants disconnected").await;
    }
    // The dropped player no longer blocks the open question.
    if let RoundPhase::Question(index) = phase {
        if runtime.all_connected_answered(index) {
            handle.notify_all_answered(index);
        }
    }
    Ok(())
}

/// Current view of a room, falling back to the stored record once archived.
pub async fn snapshot(state: &SharedState, room_id: Uuid) -> Result<RoomSnapshot, ServiceError> {
    if let Ok(handle) = state.room(room_id) {
        let runtime = handle.lock().await;
        return Ok(RoomSnapshot::from_runtime(&runtime, Instant::now()));
    }

    let store = state
        .room_store()
        .await
        .ok_or(BattleError::RoomNotFound(room_id))?;
    let entity = store
        .find_room(room_id)
        .await?
        .ok_or(BattleError::RoomNotFound(room_id))?;
    let runtime = RoomRuntime::from_entity(entity)?;
    Ok(RoomSnapshot::from_runtime(&runtime, Instant::now()))
}

/// Final standings of a completed room, from memory or from the downstream handoff.
pub async fn standings(
    state: &SharedState,
    room_id: Uuid,
) -> Result<StandingsResponse, ServiceError> {
    if let Ok(handle) = state.room(room_id) {
        let runtime = handle.lock().await;
        return match &runtime.standings {
            Some(standings) => Ok(StandingsResponse {
                room_id,
                standings: standings.iter().map(StandingSummary::from).collect(),
            }),
            None => Err(not_complete(runtime.machine.phase())),
        };
    }

    let store = state
        .room_store()
        .await
        .ok_or(BattleError::RoomNotFound(room_id))?;
    if let Some(entity) = store.find_standings(room_id).await? {
        return Ok(StandingsResponse {
            room_id,
            standings: entity
                .standings
                .into_iter()
                .map(|standing| StandingSummary {
                    rank: standing.rank,
                    user_id: standing.user_id,
                    display_name: standing.display_name,
                    total_score: standing.total_score,
                    correct_answers: standing.correct_answers,
                    correct_offset_ms: standing.correct_offset_ms,
                })
                .collect(),
        });
    }

    match store.find_room(room_id).await? {
        Some(entity) => {
            let runtime = RoomRuntime::from_entity(entity)?;
            Err(not_complete(runtime.machine.phase()))
        }
        None => Err(BattleError::RoomNotFound(room_id).into()),
    }
}

fn not_complete(phase: RoundPhase) -> ServiceError {
    match phase {
        RoundPhase::Abandoned => ServiceError::InvalidState("battle was abandoned".into()),
        _ => ServiceError::InvalidState("battle is not complete yet".into()),
    }
}
