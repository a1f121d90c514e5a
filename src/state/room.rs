use std::{collections::HashSet, time::Duration, time::SystemTime};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::BattleError;

/// Smallest roster a battle can start with.
pub const MIN_PARTICIPANTS: u8 = 2;
/// Largest roster a battle room accepts.
pub const MAX_PARTICIPANTS: u8 = 4;
/// Every question offers exactly this many options.
pub const OPTION_COUNT: usize = 4;
/// Selected index recorded for a player who did not answer in time.
pub const NO_ANSWER: i8 = -1;

/// A single multiple choice question, immutable once the room exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Identifier unique within the room's question set.
    pub id: String,
    /// Prompt shown to the players.
    pub text: String,
    /// The four answer options, in display order.
    pub options: Vec<String>,
    /// Index of the correct option (0-3).
    pub correct_index: u8,
    /// Explanation revealed together with the correct answer.
    pub explanation: String,
    /// Hard deadline for answering, in seconds.
    pub time_limit_seconds: u32,
    /// Points awarded for a correct answer before the speed bonus.
    pub base_points: u32,
}

impl Question {
    /// Time limit expressed in milliseconds.
    pub fn time_limit_ms(&self) -> u64 {
        u64::from(self.time_limit_seconds) * 1000
    }

    /// Time limit as a [`Duration`] for the server-side timer.
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms())
    }

    fn validate(&self) -> Result<(), BattleError> {
        if self.id.trim().is_empty() {
            return Err(BattleError::InvalidConfiguration(
                "question id must not be empty".into(),
            ));
        }
        if self.options.len() != OPTION_COUNT {
            return Err(BattleError::InvalidConfiguration(format!(
                "question `{}` must have exactly {OPTION_COUNT} options (got {})",
                self.id,
                self.options.len()
            )));
        }
        if usize::from(self.correct_index) >= OPTION_COUNT {
            return Err(BattleError::InvalidConfiguration(format!(
                "question `{}` has correct index {} out of range",
                self.id, self.correct_index
            )));
        }
        if self.time_limit_seconds == 0 {
            return Err(BattleError::InvalidConfiguration(format!(
                "question `{}` must have a positive time limit",
                self.id
            )));
        }
        Ok(())
    }
}

/// Whether a participant currently holds a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A socket is attached for this participant.
    Connected,
    /// The participant dropped; still counted for scoring.
    Disconnected,
}

/// Player seat inside a battle room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// External user identifier.
    pub user_id: String,
    /// Name shown to the other players.
    pub display_name: String,
    /// Exactly one participant per room is the host.
    pub is_host: bool,
    /// Ready flag toggled in the lobby.
    pub is_ready: bool,
    /// Accumulated score; only grows, and only on reveal.
    pub score: u32,
    /// Connection tracking (never used to delete a seat mid-battle).
    pub connection_state: ConnectionState,
}

impl Participant {
    fn new(user_id: String, display_name: String, is_host: bool) -> Self {
        Self {
            user_id,
            display_name,
            is_host,
            is_ready: false,
            score: 0,
            connection_state: ConnectionState::Connected,
        }
    }

    /// True when a socket is currently attached.
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// Coarse lifecycle status stored with the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoomStatus {
    /// Lobby: players join and toggle readiness.
    Waiting,
    /// Fixed countdown before the first question; roster locked.
    Countdown,
    /// Questions are being asked and revealed.
    InProgress,
    /// All questions revealed and standings computed.
    Complete,
    /// Aborted before completion; nothing is scored.
    Abandoned,
}

impl RoomStatus {
    /// Terminal statuses accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Complete | RoomStatus::Abandoned)
    }
}

/// Outcome of a participant leaving the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The seat that was released.
    pub removed: Participant,
    /// New host when the previous host left.
    pub new_host: Option<String>,
    /// True when nobody is left in the room.
    pub now_empty: bool,
}

/// Authoritative record of a room's membership and question set.
#[derive(Debug, Clone)]
pub struct BattleRoom {
    /// Room identifier.
    pub id: Uuid,
    /// User id of the current host.
    pub host_id: String,
    /// Capacity between 2 and 4.
    pub max_participants: u8,
    /// Lifecycle status, derived from the round phase.
    pub status: RoomStatus,
    /// Ordered questions fixed at creation.
    pub questions: Vec<Question>,
    /// Index of the active (or next) question; equals `questions.len()` once complete.
    pub current_question_index: usize,
    /// Seats in join order, keyed by user id.
    pub participants: IndexMap<String, Participant>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last mutation timestamp.
    pub updated_at: SystemTime,
}

impl BattleRoom {
    /// Validate the configuration and build a room with the host seated.
    pub fn new(
        host_id: String,
        host_name: String,
        questions: Vec<Question>,
        max_participants: u8,
    ) -> Result<Self, BattleError> {
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&max_participants) {
            return Err(BattleError::InvalidConfiguration(format!(
                "max participants must be between {MIN_PARTICIPANTS} and {MAX_PARTICIPANTS} (got {max_participants})"
            )));
        }
        if questions.is_empty() {
            return Err(BattleError::InvalidConfiguration(
                "a battle requires at least one question".into(),
            ));
        }
        let mut seen = HashSet::new();
        for question in &questions {
            question.validate()?;
            if !seen.insert(question.id.as_str()) {
                return Err(BattleError::InvalidConfiguration(format!(
                    "duplicate question id `{}`",
                    question.id
                )));
            }
        }
        if host_id.trim().is_empty() {
            return Err(BattleError::InvalidConfiguration(
                "host id must not be empty".into(),
            ));
        }

        let now = SystemTime::now();
        let mut participants = IndexMap::new();
        participants.insert(
            host_id.clone(),
            Participant::new(host_id.clone(), host_name, true),
        );

        Ok(Self {
            id: Uuid::new_v4(),
            host_id,
            max_participants,
            status: RoomStatus::Waiting,
            questions,
            current_question_index: 0,
            participants,
            created_at: now,
            updated_at: now,
        })
    }

    /// Seat a new participant. Checks capacity, then lobby status, then duplicates.
    pub fn join(&mut self, user_id: &str, display_name: &str) -> Result<Participant, BattleError> {
        if self.participants.len() >= usize::from(self.max_participants) {
            return Err(BattleError::RoomFull);
        }
        if self.status != RoomStatus::Waiting {
            return Err(BattleError::RoomAlreadyStarted);
        }
        if self.participants.contains_key(user_id) {
            return Err(BattleError::DuplicateParticipant(user_id.to_string()));
        }

        let participant = Participant::new(user_id.to_string(), display_name.to_string(), false);
        self.participants
            .insert(user_id.to_string(), participant.clone());
        self.touch();
        Ok(participant)
    }

    /// Release a seat while the room is still in the lobby.
    pub fn leave(&mut self, user_id: &str) -> Result<LeaveOutcome, BattleError> {
        if !self.participants.contains_key(user_id) {
            return Err(BattleError::UnknownParticipant(user_id.to_string()));
        }
        if self.status != RoomStatus::Waiting {
            return Err(BattleError::RoomAlreadyStarted);
        }

        let removed = self
            .participants
            .shift_remove(user_id)
            .ok_or_else(|| BattleError::UnknownParticipant(user_id.to_string()))?;

        let mut new_host = None;
        if removed.is_host {
            if let Some((next_id, next)) = self.participants.iter_mut().next() {
                next.is_host = true;
                self.host_id = next_id.clone();
                new_host = Some(next_id.clone());
            }
        }
        self.touch();

        Ok(LeaveOutcome {
            removed,
            new_host,
            now_empty: self.participants.is_empty(),
        })
    }

    /// Toggle readiness for a seated participant.
    pub fn set_ready(&mut self, user_id: &str, ready: bool) -> Result<(), BattleError> {
        let status = self.status;
        let participant = self
            .participants
            .get_mut(user_id)
            .ok_or_else(|| BattleError::UnknownParticipant(user_id.to_string()))?;
        if status != RoomStatus::Waiting {
            return Err(BattleError::RoomAlreadyStarted);
        }
        participant.is_ready = ready;
        self.touch();
        Ok(())
    }

    /// Update connection tracking, returning whether anything changed.
    pub fn set_connection(
        &mut self,
        user_id: &str,
        connection_state: ConnectionState,
    ) -> Result<bool, BattleError> {
        let participant = self
            .participants
            .get_mut(user_id)
            .ok_or_else(|| BattleError::UnknownParticipant(user_id.to_string()))?;
        if participant.connection_state == connection_state {
            return Ok(false);
        }
        participant.connection_state = connection_state;
        self.touch();
        Ok(true)
    }

    /// All seats ready and at least two of them.
    pub fn ready_to_start(&self) -> bool {
        self.participants.len() >= usize::from(MIN_PARTICIPANTS)
            && self.participants.values().all(|p| p.is_ready)
    }

    /// User ids of participants holding a live connection.
    pub fn connected_user_ids(&self) -> impl Iterator<Item = &str> {
        self.participants
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.user_id.as_str())
    }

    /// True when no participant holds a live connection.
    pub fn all_disconnected(&self) -> bool {
        self.participants.values().all(|p| !p.is_connected())
    }

    /// Whether `user_id` is the host.
    pub fn is_host(&self, user_id: &str) -> bool {
        self.participants
            .get(user_id)
            .is_some_and(|participant| participant.is_host)
    }

    /// Look up a question by position.
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Bump the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn question(id: &str, correct_index: u8, time_limit_seconds: u32, base_points: u32) -> Question {
        Question {
            id: id.into(),
            text: format!("Question {id}?"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_index,
            explanation: format!("Because of {id}."),
            time_limit_seconds,
            base_points,
        }
    }

    fn room(max: u8) -> BattleRoom {
        BattleRoom::new("host".into(), "Host".into(), vec![question("q1", 0, 30, 10)], max)
            .unwrap()
    }

    #[test]
    fn host_is_seated_on_creation() {
        let room = room(3);
        assert_eq!(room.participants.len(), 1);
        assert!(room.is_host("host"));
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.current_question_index, 0);
    }

    #[test]
    fn rejects_out_of_range_capacity() {
        for max in [0, 1, 5] {
            let err = BattleRoom::new("h".into(), "H".into(), vec![question("q", 0, 10, 10)], max)
                .unwrap_err();
            assert!(matches!(err, BattleError::InvalidConfiguration(_)), "{max}");
        }
    }

    #[test]
    fn rejects_empty_or_malformed_questions() {
        let err = BattleRoom::new("h".into(), "H".into(), vec![], 2).unwrap_err();
        assert!(matches!(err, BattleError::InvalidConfiguration(_)));

        let mut three_options = question("q", 0, 10, 10);
        three_options.options.pop();
        let err = BattleRoom::new("h".into(), "H".into(), vec![three_options], 2).unwrap_err();
        assert!(matches!(err, BattleError::InvalidConfiguration(_)));

        let err = BattleRoom::new(
            "h".into(),
            "H".into(),
            vec![question("q", 0, 10, 10), question("q", 1, 10, 10)],
            2,
        )
        .unwrap_err();
        assert!(matches!(err, BattleError::InvalidConfiguration(_)));
    }

    #[test]
    fn join_checks_capacity_before_status() {
        let mut room = room(2);
        room.join("p2", "P2").unwrap();
        room.status = RoomStatus::InProgress;
        assert!(matches!(room.join("p3", "P3"), Err(BattleError::RoomFull)));

        let mut room = self::room(3);
        room.status = RoomStatus::Countdown;
        assert!(matches!(
            room.join("p2", "P2"),
            Err(BattleError::RoomAlreadyStarted)
        ));
    }

    #[test]
    fn duplicate_join_is_rejected() {
        let mut room = room(3);
        assert!(matches!(
            room.join("host", "Again"),
            Err(BattleError::DuplicateParticipant(_))
        ));
    }

    #[test]
    fn host_leaving_hands_over_to_next_in_line() {
        let mut room = room(4);
        room.join("p2", "P2").unwrap();
        room.join("p3", "P3").unwrap();

        let outcome = room.leave("host").unwrap();
        assert_eq!(outcome.new_host.as_deref(), Some("p2"));
        assert!(!outcome.now_empty);
        assert_eq!(room.host_id, "p2");
        assert_eq!(room.participants.values().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn ready_requires_two_ready_players() {
        let mut room = room(3);
        room.set_ready("host", true).unwrap();
        assert!(!room.ready_to_start());

        room.join("p2", "P2").unwrap();
        assert!(!room.ready_to_start());
        room.set_ready("p2", true).unwrap();
        assert!(room.ready_to_start());

        assert!(matches!(
            room.set_ready("ghost", true),
            Err(BattleError::UnknownParticipant(_))
        ));
    }
}
