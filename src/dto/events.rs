use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{
    phase::VisiblePhase,
    room::{ParticipantSummary, QuestionSnapshot, RoomSummary, RoundSummary, StandingSummary},
};

/// Typed battle events pushed to every subscriber of a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    /// Membership, readiness or connection changed.
    RoomStateChanged {
        room: RoomSummary,
    },
    /// The round controller committed a transition.
    PhaseChanged {
        phase: VisiblePhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<QuestionSnapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_ms: Option<u64>,
    },
    /// Acknowledges a recorded answer without revealing it.
    AnswerAccepted {
        user_id: String,
        question_id: String,
    },
    /// Correct answer, explanation and per-player breakdown of a closed question.
    QuestionRevealed {
        round: RoundSummary,
        scores: Vec<ParticipantSummary>,
    },
    /// Final standings; the room is terminal.
    BattleComplete {
        standings: Vec<StandingSummary>,
    },
}

impl BattleEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            BattleEvent::RoomStateChanged { .. } => "room_state_changed",
            BattleEvent::PhaseChanged { .. } => "phase_changed",
            BattleEvent::AnswerAccepted { .. } => "answer_accepted",
            BattleEvent::QuestionRevealed { .. } => "question_revealed",
            BattleEvent::BattleComplete { .. } => "battle_complete",
        }
    }
}

/// Event together with its delivery metadata. Delivery is at-least-once;
/// consumers deduplicate on [`EventEnvelope::event_id`].
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventEnvelope {
    pub room_id: Uuid,
    pub phase: VisiblePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    /// State machine version the event was emitted at.
    pub revision: u64,
    pub event: BattleEvent,
}

impl EventEnvelope {
    /// Idempotency key derived from `(room, phase, question index)` plus the event kind.
    pub fn event_id(&self) -> String {
        let index = self
            .question_index
            .map(|index| index.to_string())
            .unwrap_or_else(|| "-".into());
        let mut id = format!(
            "{}:{}:{}:{}:{}",
            self.room_id,
            self.phase.as_str(),
            index,
            self.revision,
            self.event.name()
        );
        match &self.event {
            BattleEvent::AnswerAccepted { user_id, .. } => {
                id.push(':');
                id.push_str(user_id);
            }
            // Lobby mutations share a revision; the mutation time tells them apart.
            BattleEvent::RoomStateChanged { room } => {
                id.push(':');
                id.push_str(&room.updated_at);
            }
            _ => {}
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event: BattleEvent) -> EventEnvelope {
        EventEnvelope {
            room_id: Uuid::nil(),
            phase: VisiblePhase::Question,
            question_index: Some(2),
            revision: 5,
            event,
        }
    }

    #[test]
    fn event_ids_carry_the_idempotency_key() {
        let env = envelope(BattleEvent::AnswerAccepted {
            user_id: "alice".into(),
            question_id: "q3".into(),
        });
        assert_eq!(
            env.event_id(),
            format!("{}:question:2:5:answer_accepted:alice", Uuid::nil())
        );
    }

    #[test]
    fn events_are_tagged_by_type() {
        let env = envelope(BattleEvent::BattleComplete {
            standings: Vec::new(),
        });
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["event"]["type"], "battle_complete");
        assert_eq!(json["phase"], "question");
    }
}
