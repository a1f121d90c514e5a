use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{RoomEntity, StandingsEntity},
    room_store::RoomStore,
    storage::StorageResult,
};

/// Process-local store, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    rooms: Arc<DashMap<Uuid, RoomEntity>>,
    standings: Arc<DashMap<Uuid, StandingsEntity>>,
}

impl MemoryRoomStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryRoomStore {
    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.rooms.insert(room.id, room);
        Box::pin(async { Ok(()) })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let room = self.rooms.get(&id).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(room) })
    }

    fn list_active_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let mut rooms: Vec<RoomEntity> = self
            .rooms
            .iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        rooms.sort_by_key(|room| room.created_at);
        Box::pin(async move { Ok(rooms) })
    }

    fn save_standings(&self, standings: StandingsEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.standings.insert(standings.room_id, standings);
        Box::pin(async { Ok(()) })
    }

    fn find_standings(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<StandingsEntity>>> {
        let standings = self.standings.get(&room_id).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(standings) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{PhaseEntity, RoomStatusEntity};

    fn entity(status: RoomStatusEntity) -> RoomEntity {
        let now = SystemTime::now();
        RoomEntity {
            id: Uuid::new_v4(),
            host_id: "host".into(),
            max_participants: 2,
            status,
            phase: PhaseEntity::Waiting,
            version: 0,
            questions: Vec::new(),
            current_question_index: 0,
            participants: Vec::new(),
            answers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_replaces_previous_record() {
        let store = MemoryRoomStore::new();
        let mut room = entity(RoomStatusEntity::Waiting);
        store.save_room(room.clone()).await.unwrap();

        room.version = 3;
        store.save_room(room.clone()).await.unwrap();

        let loaded = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 3);
    }

    #[tokio::test]
    async fn only_non_terminal_rooms_are_listed_as_active() {
        let store = MemoryRoomStore::new();
        let live = entity(RoomStatusEntity::InProgress);
        store.save_room(live.clone()).await.unwrap();
        store
            .save_room(entity(RoomStatusEntity::Complete))
            .await
            .unwrap();
        store
            .save_room(entity(RoomStatusEntity::Abandoned))
            .await
            .unwrap();

        let active = store.list_active_rooms().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }

    #[tokio::test]
    async fn standings_are_keyed_by_room() {
        let store = MemoryRoomStore::new();
        let room_id = Uuid::new_v4();
        store
            .save_standings(StandingsEntity {
                room_id,
                standings: Vec::new(),
                completed_at: SystemTime::now(),
            })
            .await
            .unwrap();

        assert!(store.find_standings(room_id).await.unwrap().is_some());
        assert!(store.find_standings(Uuid::new_v4()).await.unwrap().is_none());
    }
}
