use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A stored room record cannot be turned back into a live room.
    #[error("stored room `{room_id}` is corrupt: {message}")]
    Corrupt {
        /// Room whose record failed to load.
        room_id: Uuid,
        /// What was wrong with it.
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corruption error for `room_id`.
    pub fn corrupt(room_id: Uuid, message: impl Into<String>) -> Self {
        StorageError::Corrupt {
            room_id,
            message: message.into(),
        }
    }
}
