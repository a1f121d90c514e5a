/// Database model definitions.
pub mod models;
/// Question set provider consumed at room creation.
pub mod questions;
/// Room persistence and retrieval operations.
pub mod room_store;
/// Storage abstraction layer for database operations.
pub mod storage;
