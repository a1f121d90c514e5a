pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{RoomEntity, StandingsEntity},
    storage::StorageResult,
};

pub use memory::MemoryRoomStore;

/// Abstraction over the persistence layer for battle rooms and their final standings.
pub trait RoomStore: Send + Sync {
    /// Insert or replace the record of a room.
    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a room record.
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Every room whose status is not terminal.
    fn list_active_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;
    /// Downstream handoff of the final standings of a completed room.
    fn save_standings(&self, standings: StandingsEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load the standings handed off for `room_id`.
    fn find_standings(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<StandingsEntity>>>;
    /// Cheap liveness probe used by the supervisor and `/healthcheck`.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the underlying connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
