//! Storage-facing records. Backends persist these verbatim or map them to their own
//! document shapes.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatusEntity {
    Waiting,
    Countdown,
    InProgress,
    Complete,
    Abandoned,
}

impl RoomStatusEntity {
    /// Statuses a restarted server must re-arm.
    pub const ACTIVE: [RoomStatusEntity; 3] = [
        RoomStatusEntity::Waiting,
        RoomStatusEntity::Countdown,
        RoomStatusEntity::InProgress,
    ];

    /// Name used in stored documents.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatusEntity::Waiting => "waiting",
            RoomStatusEntity::Countdown => "countdown",
            RoomStatusEntity::InProgress => "in_progress",
            RoomStatusEntity::Complete => "complete",
            RoomStatusEntity::Abandoned => "abandoned",
        }
    }

    /// Whether the room still needs a driver.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

/// Committed round phase, the record the phase is re-derived from after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum PhaseEntity {
    Waiting,
    Countdown,
    Question(u32),
    Reveal(u32),
    Complete,
    Abandoned,
}

/// Persisted question definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEntity {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: u8,
    pub explanation: String,
    pub time_limit_seconds: u32,
    pub base_points: u32,
}

/// Persisted participant seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntity {
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub score: u32,
    pub connected: bool,
}

/// Persisted answer ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntity {
    pub question_id: String,
    pub user_id: String,
    pub selected_index: i8,
    pub submitted_at_offset_ms: u64,
    pub scored: bool,
}

/// Durable room record, written after every committed transition and ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEntity {
    pub id: Uuid,
    pub host_id: String,
    pub max_participants: u8,
    pub status: RoomStatusEntity,
    pub phase: PhaseEntity,
    pub version: u64,
    pub questions: Vec<QuestionEntity>,
    pub current_question_index: u32,
    pub participants: Vec<ParticipantEntity>,
    pub answers: Vec<AnswerEntity>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// One row of the final standings handed downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingEntity {
    pub user_id: String,
    pub display_name: String,
    pub total_score: u32,
    pub correct_answers: u32,
    pub correct_offset_ms: u64,
    pub rank: u32,
}

/// Final standings of a completed room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsEntity {
    pub room_id: Uuid,
    pub standings: Vec<StandingEntity>,
    pub completed_at: SystemTime,
}
