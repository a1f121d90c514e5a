use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{MongoRoomDocument, MongoStandingsDocument, active_filter, doc_id},
};
use crate::dao::{
    models::{RoomEntity, StandingsEntity},
    room_store::RoomStore,
    storage::StorageResult,
};

const ROOM_COLLECTION_NAME: &str = "rooms";
const STANDINGS_COLLECTION_NAME: &str = "standings";

/// [`RoomStore`] backed by MongoDB.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Kept so the connection pool lives as long as the database handle.
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = self.config.open().await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = config.open().await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.rooms().await;
        let index = IndexModel::builder()
            .keys(doc! {"status": 1, "created_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("room_status_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROOM_COLLECTION_NAME,
                index: "status,created_at",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database()
            .await
            .collection::<MongoRoomDocument>(ROOM_COLLECTION_NAME)
    }

    async fn standings(&self) -> Collection<MongoStandingsDocument> {
        self.database()
            .await
            .collection::<MongoStandingsDocument>(STANDINGS_COLLECTION_NAME)
    }

    async fn save_room(&self, room: RoomEntity) -> MongoResult<()> {
        let id = room.id;
        let document: MongoRoomDocument = room.into();
        self.rooms()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveRoom { id, source })?;
        Ok(())
    }

    async fn find_room(&self, id: Uuid) -> MongoResult<Option<RoomEntity>> {
        let document = self
            .rooms()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom { id, source })?;

        document.map(RoomEntity::try_from).transpose()
    }

    async fn list_active_rooms(&self) -> MongoResult<Vec<RoomEntity>> {
        let documents: Vec<MongoRoomDocument> = self
            .rooms()
            .await
            .find(active_filter())
            .sort(doc! {"created_at": 1})
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRooms { source })?;

        documents.into_iter().map(RoomEntity::try_from).collect()
    }

    async fn save_standings(&self, standings: StandingsEntity) -> MongoResult<()> {
        let id = standings.room_id;
        let document: MongoStandingsDocument = standings.into();
        self.standings()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveStandings { id, source })?;
        Ok(())
    }

    async fn find_standings(&self, id: Uuid) -> MongoResult<Option<StandingsEntity>> {
        let document = self
            .standings()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadStandings { id, source })?;

        document.map(StandingsEntity::try_from).transpose()
    }
}

impl RoomStore for MongoRoomStore {
    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_room(room).await.map_err(Into::into) })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room(id).await.map_err(Into::into) })
    }

    fn list_active_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_rooms().await.map_err(Into::into) })
    }

    fn save_standings(&self, standings: StandingsEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_standings(standings).await.map_err(Into::into) })
    }

    fn find_standings(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<StandingsEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_standings(room_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
