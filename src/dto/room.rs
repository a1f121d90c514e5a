use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        format_system_time,
        phase::{VisiblePhase, VisibleStatus},
        validation::{validate_display_name, validate_user_id},
    },
    state::{
        battle::{RoomRuntime, RoundResult},
        ranking::FinalStanding,
        room::{BattleRoom, Participant, Question},
        state_machine::RoundPhase,
    },
};

/// Payload used by a host to open a new battle room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// User id of the host, seated on creation.
    #[validate(custom(function = "validate_user_id"))]
    pub host_id: String,
    /// Name shown for the host.
    #[validate(
        length(min = 1, max = 32),
        custom(function = "validate_display_name")
    )]
    pub host_name: String,
    /// Room capacity, 2 to 4.
    #[validate(range(min = 2, max = 4))]
    pub max_participants: u8,
    /// Named set served by the question provider; ignored when `questions` is given.
    #[serde(default)]
    pub question_set: Option<String>,
    /// Upper bound on the number of questions drawn from the set.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub question_count: Option<usize>,
    /// Inline questions, used as-is.
    #[serde(default)]
    #[validate(nested)]
    pub questions: Option<Vec<QuestionInput>>,
}

/// Inline question definition.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[validate(length(min = 1))]
    pub text: String,
    #[validate(length(equal = 4))]
    pub options: Vec<String>,
    #[validate(range(max = 3))]
    pub correct_index: u8,
    #[serde(default)]
    pub explanation: String,
    #[validate(range(min = 1, max = 600))]
    pub time_limit_seconds: u32,
    #[validate(range(max = 100_000))]
    pub base_points: u32,
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            id: value.id,
            text: value.text,
            options: value.options,
            correct_index: value.correct_index,
            explanation: value.explanation,
            time_limit_seconds: value.time_limit_seconds,
            base_points: value.base_points,
        }
    }
}

/// Public view of a participant seat.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantSummary {
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub score: u32,
    pub connected: bool,
}

impl From<&Participant> for ParticipantSummary {
    fn from(value: &Participant) -> Self {
        Self {
            user_id: value.user_id.clone(),
            display_name: value.display_name.clone(),
            is_host: value.is_host,
            is_ready: value.is_ready,
            score: value.score,
            connected: value.is_connected(),
        }
    }
}

/// Question as shown to players. The answer is only present once revealed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionSnapshot {
    pub id: String,
    pub index: usize,
    pub text: String,
    pub options: Vec<String>,
    pub time_limit_seconds: u32,
    pub base_points: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl QuestionSnapshot {
    /// Question visible in `phase`, if any.
    pub fn for_phase(room: &BattleRoom, phase: &RoundPhase) -> Option<Self> {
        let (index, revealed) = match phase {
            RoundPhase::Question(index) => (*index, false),
            RoundPhase::Reveal(index) => (*index, true),
            _ => return None,
        };
        let question = room.question(index)?;
        Some(Self {
            id: question.id.clone(),
            index,
            text: question.text.clone(),
            options: question.options.clone(),
            time_limit_seconds: question.time_limit_seconds,
            base_points: question.base_points,
            correct_index: revealed.then_some(question.correct_index),
            explanation: revealed.then(|| question.explanation.clone()),
        })
    }
}

/// Points awarded to one player for one question.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerPoints {
    pub user_id: String,
    /// Selected option, -1 when the player did not answer.
    pub selected_index: i8,
    pub submitted_at_offset_ms: u64,
    pub correct: bool,
    pub base: u32,
    pub speed_bonus: u32,
    pub points: u32,
}

/// Outcome of one revealed question.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundSummary {
    pub question_id: String,
    pub question_index: usize,
    pub correct_index: u8,
    pub explanation: String,
    pub per_player: Vec<PlayerPoints>,
}

impl RoundSummary {
    /// Summarize `round` against the room's question definitions.
    pub fn from_round(room: &BattleRoom, round: &RoundResult) -> Option<Self> {
        let question = room.question(round.question_index)?;
        Some(Self {
            question_id: round.question_id.clone(),
            question_index: round.question_index,
            correct_index: question.correct_index,
            explanation: question.explanation.clone(),
            per_player: round
                .awards
                .iter()
                .map(|award| PlayerPoints {
                    user_id: award.user_id.clone(),
                    selected_index: award.selected_index,
                    submitted_at_offset_ms: award.submitted_at_offset_ms,
                    correct: award.breakdown.correct,
                    base: award.breakdown.base,
                    speed_bonus: award.breakdown.speed_bonus,
                    points: award.breakdown.points,
                })
                .collect(),
        })
    }
}

/// Final position of one participant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingSummary {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub total_score: u32,
    pub correct_answers: u32,
    pub correct_offset_ms: u64,
}

impl From<&FinalStanding> for StandingSummary {
    fn from(value: &FinalStanding) -> Self {
        Self {
            rank: value.rank,
            user_id: value.user_id.clone(),
            display_name: value.display_name.clone(),
            total_score: value.total_score,
            correct_answers: value.correct_answers,
            correct_offset_ms: value.correct_offset_ms,
        }
    }
}

/// Final standings of a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingsResponse {
    pub room_id: Uuid,
    pub standings: Vec<StandingSummary>,
}

/// Membership view broadcast on every roster change.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSummary {
    pub room_id: Uuid,
    pub host_id: String,
    pub status: VisibleStatus,
    pub max_participants: u8,
    pub participants: Vec<ParticipantSummary>,
    /// Time of the mutation this summary reflects.
    pub updated_at: String,
}

impl From<&BattleRoom> for RoomSummary {
    fn from(room: &BattleRoom) -> Self {
        Self {
            room_id: room.id,
            host_id: room.host_id.clone(),
            status: room.status.into(),
            max_participants: room.max_participants,
            participants: room
                .participants
                .values()
                .map(ParticipantSummary::from)
                .collect(),
            updated_at: format_system_time(room.updated_at),
        }
    }
}

/// Everything a (re)connecting player needs to render the room.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSnapshot {
    pub room_id: Uuid,
    pub host_id: String,
    pub max_participants: u8,
    pub status: VisibleStatus,
    pub phase: VisiblePhase,
    /// Number of committed transitions; increases with every phase change.
    pub revision: u64,
    pub question_count: usize,
    pub current_question_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionSnapshot>,
    /// Milliseconds until the current countdown, answer window or reveal ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
    /// Players who already answered the open question.
    pub answered: Vec<String>,
    pub participants: Vec<ParticipantSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_round: Option<RoundSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standings: Option<Vec<StandingSummary>>,
    pub created_at: String,
    pub updated_at: String,
}

impl RoomSnapshot {
    /// Project the runtime of a room as seen at `now`.
    pub fn from_runtime(runtime: &RoomRuntime, now: Instant) -> Self {
        let room = &runtime.room;
        let phase = runtime.machine.phase();

        let answered = match &phase {
            RoundPhase::Question(index) => room
                .question(*index)
                .map(|question| {
                    runtime
                        .ledger
                        .entries_for(&question.id)
                        .map(|entry| entry.user_id.clone())
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let last_round = match &phase {
            RoundPhase::Reveal(index) => runtime
                .rounds
                .iter()
                .find(|round| round.question_index == *index)
                .and_then(|round| RoundSummary::from_round(room, round)),
            _ => None,
        };

        Self {
            room_id: room.id,
            host_id: room.host_id.clone(),
            max_participants: room.max_participants,
            status: room.status.into(),
            phase: VisiblePhase::from(&phase),
            revision: runtime.machine.version() as u64,
            question_count: room.questions.len(),
            current_question_index: room.current_question_index,
            question: QuestionSnapshot::for_phase(room, &phase),
            remaining_ms: runtime.remaining_ms(now),
            answered,
            participants: room
                .participants
                .values()
                .map(ParticipantSummary::from)
                .collect(),
            last_round,
            standings: runtime
                .standings
                .as_ref()
                .map(|standings| standings.iter().map(StandingSummary::from).collect()),
            created_at: format_system_time(room.created_at),
            updated_at: format_system_time(room.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::tests::question;

    fn room() -> BattleRoom {
        BattleRoom::new(
            "host".into(),
            "Host".into(),
            vec![question("q1", 2, 10, 10), question("q2", 1, 10, 10)],
            2,
        )
        .unwrap()
    }

    #[test]
    fn open_question_hides_the_answer() {
        let snapshot = QuestionSnapshot::for_phase(&room(), &RoundPhase::Question(0)).unwrap();
        assert_eq!(snapshot.id, "q1");
        assert!(snapshot.correct_index.is_none());
        assert!(snapshot.explanation.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("correct_index").is_none());
    }

    #[test]
    fn reveal_shows_the_answer() {
        let snapshot = QuestionSnapshot::for_phase(&room(), &RoundPhase::Reveal(1)).unwrap();
        assert_eq!(snapshot.correct_index, Some(1));
        assert!(snapshot.explanation.is_some());
    }

    #[test]
    fn no_question_outside_rounds() {
        assert!(QuestionSnapshot::for_phase(&room(), &RoundPhase::Countdown).is_none());
        assert!(QuestionSnapshot::for_phase(&room(), &RoundPhase::Complete).is_none());
    }

    #[test]
    fn inline_question_requires_four_options() {
        let input = QuestionInput {
            id: "q".into(),
            text: "?".into(),
            options: vec!["a".into(), "b".into()],
            correct_index: 0,
            explanation: String::new(),
            time_limit_seconds: 10,
            base_points: 10,
        };
        assert!(input.validate().is_err());
    }
}
