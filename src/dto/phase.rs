use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{room::RoomStatus, state_machine::RoundPhase};

/// Round phase as exposed to clients; the question index travels separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VisiblePhase {
    Waiting,
    Countdown,
    Question,
    Reveal,
    Complete,
    Abandoned,
}

impl VisiblePhase {
    /// Stable name, used in event identifiers.
    pub fn as_str(self) -> &'static str {
        match self {
            VisiblePhase::Waiting => "waiting",
            VisiblePhase::Countdown => "countdown",
            VisiblePhase::Question => "question",
            VisiblePhase::Reveal => "reveal",
            VisiblePhase::Complete => "complete",
            VisiblePhase::Abandoned => "abandoned",
        }
    }
}

impl From<&RoundPhase> for VisiblePhase {
    fn from(phase: &RoundPhase) -> Self {
        match phase {
            RoundPhase::Waiting => VisiblePhase::Waiting,
            RoundPhase::Countdown => VisiblePhase::Countdown,
            RoundPhase::Question(_) => VisiblePhase::Question,
            RoundPhase::Reveal(_) => VisiblePhase::Reveal,
            RoundPhase::Complete => VisiblePhase::Complete,
            RoundPhase::Abandoned => VisiblePhase::Abandoned,
        }
    }
}

/// Lifecycle status as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VisibleStatus {
    Waiting,
    Countdown,
    InProgress,
    Complete,
    Abandoned,
}

impl From<RoomStatus> for VisibleStatus {
    fn from(status: RoomStatus) -> Self {
        match status {
            RoomStatus::Waiting => VisibleStatus::Waiting,
            RoomStatus::Countdown => VisibleStatus::Countdown,
            RoomStatus::InProgress => VisibleStatus::InProgress,
            RoomStatus::Complete => VisibleStatus::Complete,
            RoomStatus::Abandoned => VisibleStatus::Abandoned,
        }
    }
}
