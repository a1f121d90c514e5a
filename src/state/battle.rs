//! Live room runtime: the single-writer record of one battle and the handle the
//! drivers and socket tasks share.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use indexmap::IndexMap;
use tokio::{
    sync::{Mutex, MutexGuard, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, ParticipantEntity, PhaseEntity, QuestionEntity, RoomEntity,
            RoomStatusEntity,
        },
        storage::StorageError,
    },
    error::{BattleError, ServiceError},
    state::{
        ledger::{AnswerEntry, AnswerLedger},
        ranking::{self, FinalStanding},
        room::{BattleRoom, ConnectionState, Participant, Question, RoomStatus},
        scoring::{self, ScoreBreakdown},
        state_machine::{RoundEvent, RoundPhase, RoundStateMachine},
    },
};

/// Points one player received for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerAward {
    /// Player.
    pub user_id: String,
    /// Selected option or -1.
    pub selected_index: i8,
    /// Clamped answer offset.
    pub submitted_at_offset_ms: u64,
    /// Scoring breakdown.
    pub breakdown: ScoreBreakdown,
}

/// Per-question outcome, computed once on reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundResult {
    /// Position of the question.
    pub question_index: usize,
    /// Question identifier.
    pub question_id: String,
    /// One award per participant, in roster order.
    pub awards: Vec<PlayerAward>,
}

impl RoundResult {
    /// Points awarded to `user_id`.
    pub fn points_for(&self, user_id: &str) -> Option<u32> {
        self.awards
            .iter()
            .find(|award| award.user_id == user_id)
            .map(|award| award.breakdown.points)
    }
}

/// Everything that changes while a battle runs. Only mutated under the room lock.
#[derive(Debug)]
pub struct RoomRuntime {
    /// Membership and question set.
    pub room: BattleRoom,
    /// Round phase state machine.
    pub machine: RoundStateMachine,
    /// Answer ledger.
    pub ledger: AnswerLedger,
    /// Revealed questions, in order.
    pub rounds: Vec<RoundResult>,
    /// Final standings once complete.
    pub standings: Option<Vec<FinalStanding>>,
    /// End of the current countdown, answer window or reveal.
    pub phase_deadline: Option<Instant>,
}

impl RoomRuntime {
    /// Runtime of a freshly created room.
    pub fn new(room: BattleRoom) -> Self {
        let machine = RoundStateMachine::new(room.questions.len());
        Self {
            room,
            machine,
            ledger: AnswerLedger::new(),
            rounds: Vec::new(),
            standings: None,
            phase_deadline: None,
        }
    }

    /// Plan `event` out of `expected`, run `work`, then apply or abort the plan.
    ///
    /// `work` must validate before it mutates so that an error leaves the room untouched.
    pub fn run_transition<T>(
        &mut self,
        expected: &RoundPhase,
        event: RoundEvent,
        work: impl FnOnce(&mut Self) -> Result<T, BattleError>,
    ) -> Result<(T, RoundPhase), ServiceError> {
        let plan = self.machine.plan(expected, event.clone())?;

        match work(self) {
            Ok(value) => {
                let next = self.machine.apply(plan.id)?;
                self.room.status = next.status();
                match next {
                    RoundPhase::Question(index) => self.room.current_question_index = index,
                    RoundPhase::Complete => {
                        self.room.current_question_index = self.room.questions.len()
                    }
                    _ => {}
                }
                self.room.touch();
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.machine.abort(plan.id) {
                    warn!(
                        room_id = %self.room.id,
                        event = ?event,
                        plan_id = %plan.id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Open the answer window of question `index` at `now`.
    pub fn open_question(&mut self, index: usize, now: Instant) -> Result<(), BattleError> {
        let question = self.question(index)?.clone();
        self.ledger.open(index, &question, now);
        self.phase_deadline = self.ledger.deadline();
        Ok(())
    }

    /// Close question `index`: synthesize timeouts, score every pending entry and add
    /// the points to the participants.
    pub fn reveal_question(
        &mut self,
        index: usize,
        reveal_for: Duration,
        now: Instant,
    ) -> Result<RoundResult, BattleError> {
        let question = self.question(index)?.clone();

        let roster: Vec<String> = self.room.participants.keys().cloned().collect();
        self.ledger
            .fill_timeouts(&question, roster.iter().map(String::as_str));

        let mut awarded: HashMap<String, PlayerAward> = HashMap::new();
        for (entry, breakdown) in self.ledger.score_pending(&question) {
            if let Some(participant) = self.room.participants.get_mut(&entry.user_id) {
                participant.score = participant.score.saturating_add(breakdown.points);
            }
            awarded.insert(entry.user_id.clone(), award(&entry, breakdown));
        }

        // Roster order; anyone scored by an earlier pass keeps a zero row.
        let awards = roster
            .iter()
            .map(|user_id| {
                awarded.remove(user_id).unwrap_or_else(|| PlayerAward {
                    user_id: user_id.clone(),
                    selected_index: crate::state::room::NO_ANSWER,
                    submitted_at_offset_ms: question.time_limit_ms(),
                    breakdown: ScoreBreakdown::default(),
                })
            })
            .collect();

        self.ledger.close();
        self.phase_deadline = Some(now + reveal_for);

        let round = RoundResult {
            question_index: index,
            question_id: question.id,
            awards,
        };
        self.rounds.push(round.clone());
        Ok(round)
    }

    /// Resolve and record the final standings.
    pub fn finish(&mut self) -> Result<Vec<FinalStanding>, BattleError> {
        let standings = ranking::standings_for(&self.room, &self.ledger);
        self.standings = Some(standings.clone());
        self.ledger.close();
        self.phase_deadline = None;
        Ok(standings)
    }

    /// Release the timers of an aborted room.
    pub fn abandon(&mut self) -> Result<(), BattleError> {
        self.ledger.close();
        self.phase_deadline = None;
        Ok(())
    }

    /// True when every connected participant has an entry for question `index`.
    /// A room with nobody connected never counts as all-answered.
    pub fn all_connected_answered(&self, index: usize) -> bool {
        let Some(question) = self.room.question(index) else {
            return false;
        };
        let mut connected = self.room.connected_user_ids().peekable();
        if connected.peek().is_none() {
            return false;
        }
        connected.all(|user_id| self.ledger.has_entry(&question.id, user_id))
    }

    /// Milliseconds until the current phase deadline.
    pub fn remaining_ms(&self, now: Instant) -> Option<u64> {
        self.phase_deadline.map(|deadline| {
            u64::try_from(deadline.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX)
        })
    }

    fn question(&self, index: usize) -> Result<&Question, BattleError> {
        self.room.question(index).ok_or_else(|| {
            BattleError::InvalidConfiguration(format!("room has no question at index {index}"))
        })
    }

    /// Durable record of the room. Abandoned rooms are written without answers or
    /// scores so no partial scoring outlives the abort.
    pub fn to_entity(&self) -> RoomEntity {
        let phase = self.machine.phase();
        let abandoned = phase == RoundPhase::Abandoned;
        let room = &self.room;

        RoomEntity {
            id: room.id,
            host_id: room.host_id.clone(),
            max_participants: room.max_participants,
            status: status_entity(room.status),
            phase: phase_entity(&phase),
            version: self.machine.version() as u64,
            questions: room.questions.iter().map(question_entity).collect(),
            current_question_index: room.current_question_index as u32,
            participants: room
                .participants
                .values()
                .map(|participant| ParticipantEntity {
                    user_id: participant.user_id.clone(),
                    display_name: participant.display_name.clone(),
                    is_host: participant.is_host,
                    is_ready: participant.is_ready,
                    score: if abandoned { 0 } else { participant.score },
                    connected: participant.is_connected(),
                })
                .collect(),
            answers: if abandoned {
                Vec::new()
            } else {
                self.ledger
                    .entries()
                    .map(|entry| AnswerEntity {
                        question_id: entry.question_id.clone(),
                        user_id: entry.user_id.clone(),
                        selected_index: entry.selected_index,
                        submitted_at_offset_ms: entry.submitted_at_offset_ms,
                        scored: entry.scored,
                    })
                    .collect()
            },
            created_at: room.created_at,
            updated_at: room.updated_at,
        }
    }

    /// Rebuild a runtime from its durable record. Round results and standings are
    /// recomputed from the scored ledger entries; no answer window is open.
    pub fn from_entity(entity: RoomEntity) -> Result<Self, StorageError> {
        let room_id = entity.id;
        let phase = restore_phase(entity.phase);
        if let Some(index) = phase.question_index() {
            if index >= entity.questions.len() {
                return Err(StorageError::corrupt(
                    room_id,
                    format!("phase points at question {index} of {}", entity.questions.len()),
                ));
            }
        }
        if entity.participants.iter().filter(|p| p.is_host).count() != 1 {
            return Err(StorageError::corrupt(room_id, "room must have exactly one host"));
        }

        let questions: Vec<Question> = entity.questions.into_iter().map(question_model).collect();
        let participants: IndexMap<String, Participant> = entity
            .participants
            .into_iter()
            .map(|participant| {
                (
                    participant.user_id.clone(),
                    Participant {
                        user_id: participant.user_id,
                        display_name: participant.display_name,
                        is_host: participant.is_host,
                        is_ready: participant.is_ready,
                        score: participant.score,
                        connection_state: if participant.connected {
                            ConnectionState::Connected
                        } else {
                            ConnectionState::Disconnected
                        },
                    },
                )
            })
            .collect();

        let room = BattleRoom {
            id: room_id,
            host_id: entity.host_id,
            max_participants: entity.max_participants,
            status: phase.status(),
            questions,
            current_question_index: entity.current_question_index as usize,
            participants,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        };

        let ledger = AnswerLedger::from_entries(entity.answers.into_iter().map(|answer| {
            AnswerEntry {
                question_id: answer.question_id,
                user_id: answer.user_id,
                selected_index: answer.selected_index,
                submitted_at_offset_ms: answer.submitted_at_offset_ms,
                scored: answer.scored,
            }
        }));

        let rounds = room
            .questions
            .iter()
            .enumerate()
            .filter_map(|(index, question)| {
                let awards: Vec<PlayerAward> = ledger
                    .entries_for(&question.id)
                    .filter(|entry| entry.scored)
                    .map(|entry| award(entry, scoring::score(entry, question)))
                    .collect();
                (!awards.is_empty()).then(|| RoundResult {
                    question_index: index,
                    question_id: question.id.clone(),
                    awards,
                })
            })
            .collect();

        let standings =
            (phase == RoundPhase::Complete).then(|| ranking::standings_for(&room, &ledger));
        let machine = RoundStateMachine::restore(
            phase,
            entity.version as usize,
            room.questions.len(),
        );

        Ok(Self {
            room,
            machine,
            ledger,
            rounds,
            standings,
            phase_deadline: None,
        })
    }
}

fn award(entry: &AnswerEntry, breakdown: ScoreBreakdown) -> PlayerAward {
    PlayerAward {
        user_id: entry.user_id.clone(),
        selected_index: entry.selected_index,
        submitted_at_offset_ms: entry.submitted_at_offset_ms,
        breakdown,
    }
}

fn status_entity(status: RoomStatus) -> RoomStatusEntity {
    match status {
        RoomStatus::Waiting => RoomStatusEntity::Waiting,
        RoomStatus::Countdown => RoomStatusEntity::Countdown,
        RoomStatus::InProgress => RoomStatusEntity::InProgress,
        RoomStatus::Complete => RoomStatusEntity::Complete,
        RoomStatus::Abandoned => RoomStatusEntity::Abandoned,
    }
}

fn phase_entity(phase: &RoundPhase) -> PhaseEntity {
    match phase {
        RoundPhase::Waiting => PhaseEntity::Waiting,
        RoundPhase::Countdown => PhaseEntity::Countdown,
        RoundPhase::Question(index) => PhaseEntity::Question(*index as u32),
        RoundPhase::Reveal(index) => PhaseEntity::Reveal(*index as u32),
        RoundPhase::Complete => PhaseEntity::Complete,
        RoundPhase::Abandoned => PhaseEntity::Abandoned,
    }
}

fn restore_phase(phase: PhaseEntity) -> RoundPhase {
    match phase {
        PhaseEntity::Waiting => RoundPhase::Waiting,
        PhaseEntity::Countdown => RoundPhase::Countdown,
        PhaseEntity::Question(index) => RoundPhase::Question(index as usize),
        PhaseEntity::Reveal(index) => RoundPhase::Reveal(index as usize),
        PhaseEntity::Complete => RoundPhase::Complete,
        PhaseEntity::Abandoned => RoundPhase::Abandoned,
    }
}

fn question_entity(question: &Question) -> QuestionEntity {
    QuestionEntity {
        id: question.id.clone(),
        text: question.text.clone(),
        options: question.options.clone(),
        correct_index: question.correct_index,
        explanation: question.explanation.clone(),
        time_limit_seconds: question.time_limit_seconds,
        base_points: question.base_points,
    }
}

fn question_model(entity: QuestionEntity) -> Question {
    Question {
        id: entity.id,
        text: entity.text,
        options: entity.options,
        correct_index: entity.correct_index,
        explanation: entity.explanation,
        time_limit_seconds: entity.time_limit_seconds,
        base_points: entity.base_points,
    }
}

/// Shared handle of one live room.
pub struct RoomHandle {
    id: Uuid,
    runtime: Mutex<RoomRuntime>,
    answered: watch::Sender<Option<usize>>,
    advance: watch::Sender<Option<usize>>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl RoomHandle {
    /// Wrap `runtime` in a handle.
    pub fn new(runtime: RoomRuntime) -> Arc<Self> {
        let (answered, _) = watch::channel(None);
        let (advance, _) = watch::channel(None);
        Arc::new(Self {
            id: runtime.room.id,
            runtime: Mutex::new(runtime),
            answered,
            advance,
            driver: StdMutex::new(None),
        })
    }

    /// Room identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Acquire the room lock. Every mutation of the room happens under it.
    pub async fn lock(&self) -> MutexGuard<'_, RoomRuntime> {
        self.runtime.lock().await
    }

    /// Current phase.
    pub async fn phase(&self) -> RoundPhase {
        self.runtime.lock().await.machine.phase()
    }

    /// Wake the driver waiting on question `index`.
    pub fn notify_all_answered(&self, index: usize) {
        self.answered.send_replace(Some(index));
    }

    /// Ask the driver to end the reveal of question `index`.
    pub fn request_advance(&self, index: usize) {
        self.advance.send_replace(Some(index));
    }

    /// Receiver of all-answered wakes, keyed by question index.
    pub fn answered_watcher(&self) -> watch::Receiver<Option<usize>> {
        self.answered.subscribe()
    }

    /// Receiver of host advance requests, keyed by question index.
    pub fn advance_watcher(&self) -> watch::Receiver<Option<usize>> {
        self.advance.subscribe()
    }

    /// Register the driver task, aborting any previous one.
    pub fn attach_driver(&self, task: JoinHandle<()>) {
        let mut slot = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Abort the driver task, releasing its timers.
    pub fn stop_driver(&self) {
        let mut slot = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }

    /// Whether a driver task is attached and still running.
    pub fn has_driver(&self) -> bool {
        let slot = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().is_some_and(|task| !task.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        room::{NO_ANSWER, tests::question},
        state_machine::CloseTrigger,
    };

    const REVEAL: Duration = Duration::from_secs(5);

    fn runtime() -> RoomRuntime {
        let mut room = BattleRoom::new(
            "alice".into(),
            "Alice".into(),
            vec![question("q1", 1, 10, 10), question("q2", 2, 10, 20)],
            3,
        )
        .unwrap();
        room.join("bob", "Bob").unwrap();
        room.join("carol", "Carol").unwrap();
        RoomRuntime::new(room)
    }

    fn step(
        runtime: &mut RoomRuntime,
        event: RoundEvent,
        work: impl FnOnce(&mut RoomRuntime) -> Result<(), BattleError>,
    ) -> RoundPhase {
        let expected = runtime.machine.phase();
        runtime.run_transition(&expected, event, work).unwrap().1
    }

    fn start(runtime: &mut RoomRuntime, now: Instant) {
        step(runtime, RoundEvent::AllReady, |_| Ok(()));
        step(runtime, RoundEvent::CountdownElapsed, |rt| {
            rt.open_question(0, now)
        });
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_keep_status_and_index_in_step() {
        let mut rt = runtime();
        let now = Instant::now();
        start(&mut rt, now);
        assert_eq!(rt.room.status, RoomStatus::InProgress);
        assert_eq!(rt.room.current_question_index, 0);
        assert_eq!(rt.remaining_ms(now), Some(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_work_aborts_the_plan() {
        let mut rt = runtime();
        let err = rt
            .run_transition(&RoundPhase::Waiting, RoundEvent::AllReady, |_| {
                Err::<(), _>(BattleError::RoomFull)
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::Battle(BattleError::RoomFull)));
        assert_eq!(rt.machine.phase(), RoundPhase::Waiting);
        assert!(rt.machine.snapshot().pending.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_fills_timeouts_and_scores_once() {
        let mut rt = runtime();
        let now = Instant::now();
        start(&mut rt, now);
        rt.ledger.submit("q1", "alice", 1, 0, now).unwrap();
        rt.ledger.submit("q1", "bob", 0, 100, now).unwrap();

        let (round, phase) = rt
            .run_transition(
                &RoundPhase::Question(0),
                RoundEvent::CloseQuestion {
                    index: 0,
                    trigger: CloseTrigger::Timer,
                },
                |rt| rt.reveal_question(0, REVEAL, now),
            )
            .unwrap();

        assert_eq!(phase, RoundPhase::Reveal(0));
        assert_eq!(round.points_for("alice"), Some(15));
        assert_eq!(round.points_for("bob"), Some(0));
        assert_eq!(round.points_for("carol"), Some(0));
        assert_eq!(
            rt.ledger.entry("q1", "carol").unwrap().selected_index,
            NO_ANSWER
        );
        assert_eq!(rt.room.participants["alice"].score, 15);
        assert!(rt.ledger.open_index().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn all_answered_ignores_disconnected_players() {
        let mut rt = runtime();
        let now = Instant::now();
        start(&mut rt, now);
        rt.room
            .set_connection("carol", ConnectionState::Disconnected)
            .unwrap();

        rt.ledger.submit("q1", "alice", 1, 0, now).unwrap();
        assert!(!rt.all_connected_answered(0));
        rt.ledger.submit("q1", "bob", 1, 0, now).unwrap();
        assert!(rt.all_connected_answered(0));

        for user in ["alice", "bob"] {
            rt.room
                .set_connection(user, ConnectionState::Disconnected)
                .unwrap();
        }
        assert!(!rt.all_connected_answered(0));
    }

    #[tokio::test(start_paused = true)]
    async fn entity_round_trip_restores_phase_scores_and_rounds() {
        let mut rt = runtime();
        let now = Instant::now();
        start(&mut rt, now);
        rt.ledger.submit("q1", "alice", 1, 0, now).unwrap();
        step(
            &mut rt,
            RoundEvent::CloseQuestion {
                index: 0,
                trigger: CloseTrigger::Timer,
            },
            |rt| rt.reveal_question(0, REVEAL, now).map(|_| ()),
        );

        let restored = RoomRuntime::from_entity(rt.to_entity()).unwrap();
        assert_eq!(restored.machine.phase(), RoundPhase::Reveal(0));
        assert_eq!(restored.machine.version(), rt.machine.version());
        assert_eq!(restored.room.participants["alice"].score, 15);
        assert_eq!(restored.rounds.len(), 1);
        assert_eq!(restored.rounds[0].points_for("alice"), Some(15));
        assert_eq!(restored.ledger.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_rooms_persist_without_scoring() {
        let mut rt = runtime();
        let now = Instant::now();
        start(&mut rt, now);
        rt.ledger.submit("q1", "alice", 1, 0, now).unwrap();
        step(&mut rt, RoundEvent::Abort, |rt| rt.abandon());

        let entity = rt.to_entity();
        assert_eq!(entity.status, RoomStatusEntity::Abandoned);
        assert!(entity.answers.is_empty());
        assert!(entity.participants.iter().all(|p| p.score == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn driver_slot_replaces_and_stops_tasks() {
        let handle = RoomHandle::new(runtime());
        let first = tokio::spawn(std::future::pending::<()>());
        handle.attach_driver(first);
        assert!(handle.has_driver());

        handle.stop_driver();
        tokio::task::yield_now().await;
        assert!(!handle.has_driver());
    }
}
