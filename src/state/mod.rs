pub mod battle;
mod fanout;
pub mod ledger;
pub mod ranking;
pub mod room;
pub mod scoring;
pub mod state_machine;
pub mod transitions;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::{
    sync::{RwLock, mpsc, watch},
    time::timeout,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        questions::{ConfiguredQuestionBank, QuestionProvider},
        room_store::RoomStore,
    },
    error::BattleError,
};

use self::battle::{RoomHandle, RoomRuntime};
pub use self::fanout::EventHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};

pub type SharedState = Arc<AppState>;

/// Upper bound on one room write; the room lock is held while it runs.
const STORE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
/// Handle used to push messages to a connected player socket.
pub struct PlayerConnection {
    /// Distinguishes a reconnecting socket from the one it replaced.
    pub connection_id: Uuid,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: the live room arena, player sockets, event fan-out and
/// the storage handle.
pub struct AppState {
    config: Arc<AppConfig>,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    questions: Arc<dyn QuestionProvider>,
    events: EventHub,
    rooms: DashMap<Uuid, Arc<RoomHandle>>,
    connections: DashMap<(Uuid, String), PlayerConnection>,
    degraded: watch::Sender<bool>,
    recovered: AtomicBool,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Questions are served from the sets in `config`. The application starts in
    /// degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let provider = ConfiguredQuestionBank::new(
            config.question_sets().clone(),
            config.shuffle_questions(),
        );
        Self::with_question_provider(config, Arc::new(provider))
    }

    /// Same as [`AppState::new`] with an explicit question provider.
    pub fn with_question_provider(
        config: AppConfig,
        questions: Arc<dyn QuestionProvider>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            events: EventHub::new(config.event_capacity()),
            config: Arc::new(config),
            room_store: RwLock::new(None),
            questions,
            rooms: DashMap::new(),
            connections: DashMap::new(),
            degraded: degraded_tx,
            recovered: AtomicBool::new(false),
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Question provider consulted at room creation.
    pub fn questions(&self) -> Arc<dyn QuestionProvider> {
        self.questions.clone()
    }

    /// Fan-out hub shared by the SSE streams and player sockets.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Live rooms keyed by id.
    pub fn rooms(&self) -> &DashMap<Uuid, Arc<RoomHandle>> {
        &self.rooms
    }

    /// Handle of a live room.
    pub fn room(&self, room_id: Uuid) -> Result<Arc<RoomHandle>, BattleError> {
        self.rooms
            .get(&room_id)
            .map(|entry| entry.value().clone())
            .ok_or(BattleError::RoomNotFound(room_id))
    }

    /// Registry of player sockets keyed by `(room, user)`.
    pub fn connections(&self) -> &DashMap<(Uuid, String), PlayerConnection> {
        &self.connections
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Write the room record. Storage failures are logged and never stop the battle;
    /// the in-memory arena stays authoritative.
    pub async fn persist_room(&self, runtime: &RoomRuntime) {
        let Some(store) = self.room_store().await else {
            debug!(room_id = %runtime.room.id, "no storage installed; room kept in memory only");
            return;
        };
        match timeout(STORE_WRITE_TIMEOUT, store.save_room(runtime.to_entity())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(room_id = %runtime.room.id, error = %err, "failed to persist room"),
            Err(_) => warn!(
                room_id = %runtime.room.id,
                timeout_ms = STORE_WRITE_TIMEOUT.as_millis() as u64,
                "room write timed out; battle continues from memory"
            ),
        }
    }

    /// Mark stored rooms as recovered. Returns true only for the first caller.
    pub fn mark_recovered(&self) -> bool {
        !self.recovered.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use futures::{FutureExt, future::BoxFuture};

    use super::*;
    use crate::{
        dao::{
            models::{RoomEntity, StandingsEntity},
            room_store::MemoryRoomStore,
            storage::StorageResult,
        },
        state::room::{BattleRoom, tests::question},
    };

    /// Store whose room writes never complete.
    struct StalledStore;

    impl RoomStore for StalledStore {
        fn save_room(&self, _room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
            futures::future::pending().boxed()
        }
        fn find_room(&self, _id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
            async { Ok(None) }.boxed()
        }
        fn list_active_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
            async { Ok(Vec::new()) }.boxed()
        }
        fn save_standings(&self, _standings: StandingsEntity) -> BoxFuture<'static, StorageResult<()>> {
            async { Ok(()) }.boxed()
        }
        fn find_standings(
            &self,
            _room_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Option<StandingsEntity>>> {
            async { Ok(None) }.boxed()
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            async { Ok(()) }.boxed()
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_writes_give_up() {
        let state = AppState::new(AppConfig::default());
        state.install_room_store(Arc::new(StalledStore)).await;
        let room = BattleRoom::new("host".into(), "Host".into(), vec![question("q1", 0, 10, 10)], 2)
            .unwrap();
        let runtime = RoomRuntime::new(room);

        let started = tokio::time::Instant::now();
        state.persist_room(&runtime).await;
        assert!(started.elapsed() >= STORE_WRITE_TIMEOUT);
    }

    #[tokio::test]
    async fn installing_a_store_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());

        state
            .install_room_store(Arc::new(MemoryRoomStore::new()))
            .await;
        assert!(!state.is_degraded());
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        state.clear_room_store().await;
        assert!(state.is_degraded());
        assert!(state.room_store().await.is_none());
    }

    #[test]
    fn recovery_runs_once() {
        let state = AppState::new(AppConfig::default());
        assert!(state.mark_recovered());
        assert!(!state.mark_recovered());
    }

    #[test]
    fn unknown_rooms_are_not_found() {
        let state = AppState::new(AppConfig::default());
        let id = Uuid::new_v4();
        assert!(matches!(state.room(id), Err(BattleError::RoomNotFound(found)) if found == id));
    }
}
