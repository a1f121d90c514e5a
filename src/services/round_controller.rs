//! Round controller: one driver task per started room, racing the phase timer against
//! the all-answered and host-advance wakes.

use std::{sync::Arc, time::SystemTime};

use tokio::{
    sync::watch,
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{StandingEntity, StandingsEntity},
    error::{BattleError, ServiceError},
    services::events::{broadcast_battle_complete, broadcast_question_revealed},
    state::{
        SharedState,
        battle::{RoomHandle, RoomRuntime},
        ranking::FinalStanding,
        room::ConnectionState,
        state_machine::{AdvanceTrigger, CloseTrigger, RoundEvent, RoundPhase},
        transitions::run_transition_with_broadcast,
    },
};

/// Start the driver task of `handle`, replacing any previous one.
pub fn spawn_driver(state: &SharedState, handle: &Arc<RoomHandle>) {
    let task = tokio::spawn(drive(state.clone(), handle.clone()));
    handle.attach_driver(task);
}

async fn drive(state: SharedState, handle: Arc<RoomHandle>) {
    let room_id = handle.id();
    let mut answered = handle.answered_watcher();
    let mut advance = handle.advance_watcher();

    loop {
        let (phase, deadline) = {
            let runtime = handle.lock().await;
            (runtime.machine.phase(), runtime.phase_deadline)
        };

        let outcome = match phase {
            RoundPhase::Countdown => {
                sleep_until_deadline(deadline).await;
                debug!(room_id = %room_id, "countdown elapsed");
                if abandon_if_unattended(&state, &handle).await {
                    break;
                }
                open_first_question(&state, &handle).await
            }
            RoundPhase::Question(index) => {
                let trigger = tokio::select! {
                    _ = sleep_until_deadline(deadline) => CloseTrigger::Timer,
                    _ = wait_for_index(&mut answered, index) => CloseTrigger::AllAnswered,
                };
                if abandon_if_unattended(&state, &handle).await {
                    break;
                }
                close_question(&state, &handle, index, trigger).await
            }
            RoundPhase::Reveal(index) => {
                let trigger = tokio::select! {
                    _ = sleep_until_deadline(deadline) => AdvanceTrigger::Timer,
                    _ = wait_for_index(&mut advance, index) => AdvanceTrigger::Host,
                };
                if abandon_if_unattended(&state, &handle).await {
                    break;
                }
                advance_from_reveal(&state, &handle, index, trigger).await
            }
            RoundPhase::Waiting | RoundPhase::Complete | RoundPhase::Abandoned => break,
        };

        match outcome {
            Ok(()) => {}
            Err(err) if err.is_stale() => {
                debug!(room_id = %room_id, error = %err, "discarding stale transition");
                if handle.phase().await == phase {
                    warn!(room_id = %room_id, phase = ?phase, "transition refused without progress");
                    break;
                }
            }
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "round driver stopped");
                break;
            }
        }
    }

    debug!(room_id = %room_id, "round driver finished");
}

/// Abandon the room at a phase boundary when no seat is connected. Live rooms are
/// abandoned as soon as the last socket drops, so this only catches recovered rooms
/// nobody came back to.
async fn abandon_if_unattended(state: &SharedState, handle: &RoomHandle) -> bool {
    let mut runtime = handle.lock().await;
    if runtime.machine.phase().is_terminal() || !runtime.room.all_disconnected() {
        return false;
    }
    match abandon_locked(state, handle, &mut runtime, "nobody reconnected").await {
        Ok(()) => true,
        Err(err) => {
            warn!(room_id = %handle.id(), error = %err, "failed to abandon unattended room");
            false
        }
    }
}

/// Abandon the lobby of `room_id` if no seat is connected once the lobby timeout elapsed.
pub fn schedule_lobby_expiry(state: &SharedState, room_id: Uuid) {
    let state = state.clone();
    let timeout = state.config().lobby_timeout();
    tokio::spawn(async move {
        sleep(timeout).await;
        let Ok(handle) = state.room(room_id) else {
            return;
        };
        let mut runtime = handle.lock().await;
        if runtime.machine.phase() != RoundPhase::Waiting || !runtime.room.all_disconnected() {
            return;
        }
        if let Err(err) = abandon_locked(&state, &handle, &mut runtime, "lobby never attended").await {
            warn!(room_id = %room_id, error = %err, "failed to expire lobby");
        }
    });
}

/// Sleep until `deadline`; a phase without one fires immediately.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        sleep_until(deadline).await;
    }
}

/// Resolve once the channel carries `index`. Never resolves if the sender is gone.
async fn wait_for_index(rx: &mut watch::Receiver<Option<usize>>, index: usize) {
    if rx.wait_for(|value| *value == Some(index)).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Lock the roster and start the countdown when every seat is ready.
pub async fn start_countdown_if_ready(
    state: &SharedState,
    handle: &Arc<RoomHandle>,
    runtime: &mut RoomRuntime,
) -> Result<(), ServiceError> {
    if runtime.machine.phase() != RoundPhase::Waiting || !runtime.room.ready_to_start() {
        return Ok(());
    }

    let countdown = state.config().timing().countdown;
    let now = Instant::now();
    run_transition_with_broadcast(
        state,
        runtime,
        &RoundPhase::Waiting,
        RoundEvent::AllReady,
        |rt| {
            rt.phase_deadline = Some(now + countdown);
            Ok(())
        },
    )
    .await?;

    info!(
        room_id = %runtime.room.id,
        participants = runtime.room.participants.len(),
        countdown_ms = countdown.as_millis() as u64,
        "all participants ready; countdown started"
    );
    spawn_driver(state, handle);
    Ok(())
}

async fn open_first_question(state: &SharedState, handle: &RoomHandle) -> Result<(), ServiceError> {
    let mut runtime = handle.lock().await;
    let now = Instant::now();
    run_transition_with_broadcast(
        state,
        &mut runtime,
        &RoundPhase::Countdown,
        RoundEvent::CountdownElapsed,
        |rt| rt.open_question(0, now),
    )
    .await?;
    info!(room_id = %handle.id(), question_index = 0, "question opened");
    Ok(())
}

/// Close question `index`, score it and broadcast the reveal. A second close of the
/// same question loses the compare-and-swap and surfaces as a stale transition.
pub async fn close_question(
    state: &SharedState,
    handle: &RoomHandle,
    index: usize,
    trigger: CloseTrigger,
) -> Result<(), ServiceError> {
    let mut runtime = handle.lock().await;
    let reveal_for = state.config().timing().reveal_wait();
    let now = Instant::now();

    let (round, _) = run_transition_with_broadcast(
        state,
        &mut runtime,
        &RoundPhase::Question(index),
        RoundEvent::CloseQuestion { index, trigger },
        |rt| rt.reveal_question(index, reveal_for, now),
    )
    .await?;

    info!(
        room_id = %handle.id(),
        question_index = index,
        trigger = ?trigger,
        answers = round.awards.len(),
        "question closed and scored"
    );
    broadcast_question_revealed(state, &runtime, &round);
    Ok(())
}

/// Leave the reveal of `index`: open the next question, or publish the standings after
/// the last one.
pub async fn advance_from_reveal(
    state: &SharedState,
    handle: &RoomHandle,
    index: usize,
    trigger: AdvanceTrigger,
) -> Result<(), ServiceError> {
    let mut runtime = handle.lock().await;
    let expected = RoundPhase::Reveal(index);
    let last = runtime.room.questions.len().saturating_sub(1);

    if index < last {
        let now = Instant::now();
        run_transition_with_broadcast(
            state,
            &mut runtime,
            &expected,
            RoundEvent::NextQuestion { index, trigger },
            |rt| rt.open_question(index + 1, now),
        )
        .await?;
        info!(
            room_id = %handle.id(),
            question_index = index + 1,
            trigger = ?trigger,
            "question opened"
        );
        return Ok(());
    }

    let (standings, _) = run_transition_with_broadcast(
        state,
        &mut runtime,
        &expected,
        RoundEvent::Finish,
        |rt| rt.finish(),
    )
    .await?;

    info!(
        room_id = %handle.id(),
        participants = standings.len(),
        winner = standings.first().map(|s| s.user_id.as_str()).unwrap_or_default(),
        "battle complete"
    );
    broadcast_battle_complete(state, &runtime, &standings);
    hand_off_standings(state, handle.id(), &standings);
    drop(runtime);

    schedule_archive(state, handle.id());
    Ok(())
}

/// Host-only: end the current reveal early.
pub async fn host_advance(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
) -> Result<(), ServiceError> {
    let handle = state.room(room_id)?;
    let runtime = handle.lock().await;

    if !runtime.room.participants.contains_key(user_id) {
        return Err(BattleError::UnknownParticipant(user_id.to_string()).into());
    }
    if !runtime.room.is_host(user_id) {
        return Err(BattleError::NotHost.into());
    }

    match runtime.machine.phase() {
        RoundPhase::Reveal(index) => {
            info!(room_id = %room_id, question_index = index, "host requested advance");
            handle.request_advance(index);
            Ok(())
        }
        other => Err(BattleError::StaleTransition(format!(
            "host advance ignored while in {other:?}"
        ))
        .into()),
    }
}

/// Abort a live room into the terminal abandoned phase and release its timers.
/// Must be called with the room lock held.
pub async fn abandon_locked(
    state: &SharedState,
    handle: &RoomHandle,
    runtime: &mut RoomRuntime,
    reason: &'static str,
) -> Result<(), ServiceError> {
    let expected = runtime.machine.phase();
    run_transition_with_broadcast(state, runtime, &expected, RoundEvent::Abort, |rt| {
        rt.abandon()
    })
    .await?;

    warn!(room_id = %handle.id(), from = ?expected, reason, "battle abandoned");
    handle.stop_driver();
    schedule_archive(state, handle.id());
    Ok(())
}

/// Fire-and-forget downstream handoff of the final standings.
fn hand_off_standings(state: &SharedState, room_id: Uuid, standings: &[FinalStanding]) {
    let entity = StandingsEntity {
        room_id,
        standings: standings
            .iter()
            .map(|standing| StandingEntity {
                user_id: standing.user_id.clone(),
                display_name: standing.display_name.clone(),
                total_score: standing.total_score,
                correct_answers: standing.correct_answers,
                correct_offset_ms: standing.correct_offset_ms,
                rank: standing.rank,
            })
            .collect(),
        completed_at: SystemTime::now(),
    };

    let state = state.clone();
    tokio::spawn(async move {
        let Some(store) = state.room_store().await else {
            warn!(room_id = %room_id, "no storage installed; standings handoff skipped");
            return;
        };
        match store.save_standings(entity).await {
            Ok(()) => info!(room_id = %room_id, "standings handed off"),
            Err(err) => warn!(room_id = %room_id, error = %err, "standings handoff failed"),
        }
    });
}

/// Drop a terminal room from the in-memory arena once the archival delay elapsed.
fn schedule_archive(state: &SharedState, room_id: Uuid) {
    let state = state.clone();
    let delay = state.config().archive_after();
    tokio::spawn(async move {
        sleep(delay).await;
        if state.rooms().remove(&room_id).is_some() {
            state
                .connections()
                .retain(|(connection_room, _), _| *connection_room != room_id);
            info!(room_id = %room_id, "room archived");
        }
    });
}

/// Re-arm every non-terminal room found in storage. Participants start disconnected;
/// a countdown restarts, an open question reopens its full window keeping its ledger
/// entries, and a reveal resumes its wait. A started room nobody reconnected to by the
/// end of that wait is abandoned; a lobby falls under the lobby timeout.
pub async fn recover_rooms(state: &SharedState) -> Result<usize, ServiceError> {
    let Some(store) = state.room_store().await else {
        return Ok(0);
    };
    let entities = store.list_active_rooms().await?;
    let timing = state.config().timing();
    let mut recovered = 0;

    for entity in entities {
        let room_id = entity.id;
        if state.rooms().contains_key(&room_id) {
            continue;
        }

        let mut runtime = match RoomRuntime::from_entity(entity) {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "skipping unrecoverable room");
                continue;
            }
        };
        for participant in runtime.room.participants.values_mut() {
            participant.connection_state = ConnectionState::Disconnected;
        }

        let now = Instant::now();
        let phase = runtime.machine.phase();
        match phase {
            RoundPhase::Countdown => runtime.phase_deadline = Some(now + timing.countdown),
            RoundPhase::Question(index) => {
                if let Err(err) = runtime.open_question(index, now) {
                    warn!(room_id = %room_id, error = %err, "skipping unrecoverable room");
                    continue;
                }
            }
            RoundPhase::Reveal(_) => runtime.phase_deadline = Some(now + timing.reveal_wait()),
            RoundPhase::Waiting | RoundPhase::Complete | RoundPhase::Abandoned => {}
        }

        let handle = RoomHandle::new(runtime);
        state.rooms().insert(room_id, handle.clone());
        match phase {
            RoundPhase::Countdown | RoundPhase::Question(_) | RoundPhase::Reveal(_) => {
                spawn_driver(state, &handle)
            }
            RoundPhase::Waiting => schedule_lobby_expiry(state, room_id),
            RoundPhase::Complete | RoundPhase::Abandoned => {}
        }
        info!(room_id = %room_id, phase = ?phase, "room recovered from storage");
        recovered += 1;
    }

    Ok(recovered)
}
