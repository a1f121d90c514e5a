use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB room store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save room `{id}`")]
    SaveRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{id}`")]
    LoadRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list active rooms")]
    ListRooms {
        #[source]
        source: MongoError,
    },
    #[error("failed to save standings of room `{id}`")]
    SaveStandings {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load standings of room `{id}`")]
    LoadStandings {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("stored document `{id}` has a malformed identifier")]
    MalformedId {
        id: String,
        #[source]
        source: uuid::Error,
    },
}
