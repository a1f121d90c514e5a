#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use quiz_battle_back::{
    config::{AppConfig, RoundTiming},
    dao::room_store::{MemoryRoomStore, RoomStore},
    dto::{
        events::{BattleEvent, EventEnvelope},
        phase::VisiblePhase,
        room::{CreateRoomRequest, QuestionInput, RoundSummary, StandingSummary},
    },
    services::room_service,
    state::{AppState, SharedState},
};

const EVENT_WAIT: Duration = Duration::from_secs(600);

pub fn timing() -> RoundTiming {
    RoundTiming {
        countdown: Duration::from_millis(3_000),
        reveal_display: Duration::from_millis(2_000),
        reveal_max_wait: Duration::from_millis(10_000),
        auto_advance: true,
        latency_allowance: Duration::from_millis(500),
    }
}

pub fn question(id: &str, correct_index: u8, time_limit_seconds: u32, base_points: u32) -> QuestionInput {
    QuestionInput {
        id: id.to_string(),
        text: format!("Question {id}?"),
        options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        correct_index,
        explanation: format!("Because of {id}."),
        time_limit_seconds,
        base_points,
    }
}

/// Five questions of 20 s and 10 points; question `i` has correct index `i % 4`.
pub fn five_questions() -> Vec<QuestionInput> {
    (0..5)
        .map(|i| question(&format!("q{i}"), (i % 4) as u8, 20, 10))
        .collect()
}

pub async fn state_with_store(timing: RoundTiming, store: Arc<dyn RoomStore>) -> SharedState {
    let state = AppState::new(AppConfig::default().with_timing(timing));
    state.install_room_store(store).await;
    state
}

pub async fn state() -> SharedState {
    state_with_store(timing(), Arc::new(MemoryRoomStore::new())).await
}

pub fn create_request(host: &str, questions: Vec<QuestionInput>, max_participants: u8) -> CreateRoomRequest {
    CreateRoomRequest {
        host_id: host.to_string(),
        host_name: host.to_uppercase(),
        max_participants,
        question_set: None,
        question_count: None,
        questions: Some(questions),
    }
}

pub struct Battle {
    pub state: SharedState,
    pub room_id: Uuid,
    events: broadcast::Receiver<EventEnvelope>,
}

impl Battle {
    /// Create a room hosted by `players[0]` and seat everyone, without readying.
    pub async fn lobby(
        state: &SharedState,
        players: &[&str],
        questions: Vec<QuestionInput>,
        max_participants: u8,
    ) -> Self {
        let snapshot = room_service::create_room(state, create_request(players[0], questions, max_participants))
            .await
            .unwrap();
        let events = state.events().subscribe();
        for player in players {
            room_service::connect_player(state, snapshot.room_id, player, &player.to_uppercase())
                .await
                .unwrap();
        }
        Self {
            state: state.clone(),
            room_id: snapshot.room_id,
            events,
        }
    }

    /// Follow the events of an existing room.
    pub fn watch(state: &SharedState, room_id: Uuid) -> Self {
        Self {
            state: state.clone(),
            room_id,
            events: state.events().subscribe(),
        }
    }

    /// Seat everyone and ready them; the last ready flag starts the countdown.
    pub async fn start(
        state: &SharedState,
        players: &[&str],
        questions: Vec<QuestionInput>,
        max_participants: u8,
    ) -> Self {
        let battle = Self::lobby(state, players, questions, max_participants).await;
        for player in players {
            room_service::set_ready(state, battle.room_id, player, true)
                .await
                .unwrap();
        }
        battle
    }

    pub async fn next_matching<T>(&mut self, mut pick: impl FnMut(&EventEnvelope) -> Option<T>) -> T {
        let room_id = self.room_id;
        let events = &mut self.events;
        tokio::time::timeout(EVENT_WAIT, async move {
            loop {
                match events.recv().await {
                    Ok(envelope) if envelope.room_id == room_id => {
                        if let Some(value) = pick(&envelope) {
                            return value;
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event hub closed"),
                }
            }
        })
        .await
        .expect("expected battle event never arrived")
    }

    pub async fn until_phase(&mut self, phase: VisiblePhase, index: Option<usize>) {
        self.next_matching(|envelope| match &envelope.event {
            BattleEvent::PhaseChanged {
                phase: seen,
                question_index,
                ..
            } if *seen == phase && *question_index == index => Some(()),
            _ => None,
        })
        .await
    }

    pub async fn until_question(&mut self, index: usize) {
        self.until_phase(VisiblePhase::Question, Some(index)).await
    }

    pub async fn until_revealed(&mut self, index: usize) -> RoundSummary {
        self.next_matching(|envelope| match &envelope.event {
            BattleEvent::QuestionRevealed { round, .. } if round.question_index == index => {
                Some(round.clone())
            }
            _ => None,
        })
        .await
    }

    /// Every event of the room up to and including `BattleComplete`.
    pub async fn events_until_complete(&mut self) -> Vec<BattleEvent> {
        let mut seen = Vec::new();
        self.next_matching(|envelope| {
            seen.push(envelope.event.clone());
            matches!(envelope.event, BattleEvent::BattleComplete { .. }).then_some(())
        })
        .await;
        seen
    }

    pub async fn until_complete(&mut self) -> Vec<StandingSummary> {
        self.next_matching(|envelope| match &envelope.event {
            BattleEvent::BattleComplete { standings } => Some(standings.clone()),
            _ => None,
        })
        .await
    }
}

pub fn points_of(round: &RoundSummary, user_id: &str) -> u32 {
    round
        .per_player
        .iter()
        .find(|points| points.user_id == user_id)
        .map(|points| points.points)
        .unwrap_or_else(|| panic!("no points for {user_id}"))
}

pub fn ranking(standings: &[StandingSummary]) -> Vec<(&str, u32, u32)> {
    standings
        .iter()
        .map(|standing| (standing.user_id.as_str(), standing.rank, standing.total_score))
        .collect()
}
