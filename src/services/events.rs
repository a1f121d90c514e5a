//! Construction of typed battle events and their publication on the fan-out hub.

use tokio::time::Instant;
use tracing::debug;

use crate::{
    dto::{
        events::{BattleEvent, EventEnvelope},
        phase::VisiblePhase,
        room::{ParticipantSummary, QuestionSnapshot, RoomSummary, RoundSummary, StandingSummary},
    },
    state::{
        SharedState,
        battle::{RoomRuntime, RoundResult},
        ranking::FinalStanding,
    },
};

/// Broadcast the membership view after any roster, readiness or connection change.
pub fn broadcast_room_state(state: &SharedState, runtime: &RoomRuntime) {
    publish(
        state,
        runtime,
        BattleEvent::RoomStateChanged {
            room: RoomSummary::from(&runtime.room),
        },
    );
}

/// Broadcast the phase the room just entered.
pub fn broadcast_phase_changed(state: &SharedState, runtime: &RoomRuntime, now: Instant) {
    let phase = runtime.machine.phase();
    publish(
        state,
        runtime,
        BattleEvent::PhaseChanged {
            phase: VisiblePhase::from(&phase),
            question_index: phase.question_index(),
            question: QuestionSnapshot::for_phase(&runtime.room, &phase),
            remaining_ms: runtime.remaining_ms(now),
        },
    );
}

/// Acknowledge a recorded answer without revealing the selection.
pub fn broadcast_answer_accepted(
    state: &SharedState,
    runtime: &RoomRuntime,
    user_id: &str,
    question_id: &str,
) {
    publish(
        state,
        runtime,
        BattleEvent::AnswerAccepted {
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
        },
    );
}

/// Broadcast the correct answer and per-player breakdown of a closed question.
pub fn broadcast_question_revealed(state: &SharedState, runtime: &RoomRuntime, round: &RoundResult) {
    let Some(summary) = RoundSummary::from_round(&runtime.room, round) else {
        return;
    };
    publish(
        state,
        runtime,
        BattleEvent::QuestionRevealed {
            round: summary,
            scores: runtime
                .room
                .participants
                .values()
                .map(ParticipantSummary::from)
                .collect(),
        },
    );
}

/// Broadcast the final standings.
pub fn broadcast_battle_complete(
    state: &SharedState,
    runtime: &RoomRuntime,
    standings: &[FinalStanding],
) {
    publish(
        state,
        runtime,
        BattleEvent::BattleComplete {
            standings: standings.iter().map(StandingSummary::from).collect(),
        },
    );
}

fn envelope(runtime: &RoomRuntime, event: BattleEvent) -> EventEnvelope {
    let phase = runtime.machine.phase();
    EventEnvelope {
        room_id: runtime.room.id,
        phase: VisiblePhase::from(&phase),
        question_index: phase.question_index(),
        revision: runtime.machine.version() as u64,
        event,
    }
}

fn publish(state: &SharedState, runtime: &RoomRuntime, event: BattleEvent) {
    let envelope = envelope(runtime, event);
    debug!(
        room_id = %envelope.room_id,
        event = envelope.event.name(),
        event_id = %envelope.event_id(),
        "publishing battle event"
    );
    state.events().publish(envelope);
}
