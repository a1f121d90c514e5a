use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "quiz_battle";
const PING_ATTEMPTS: u32 = 5;
const PING_BACKOFF: Duration = Duration::from_millis(250);
const PING_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Connection settings for [`super::MongoRoomStore`].
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed driver options.
    pub options: ClientOptions,
    /// Database holding the `rooms` and `standings` collections.
    pub database_name: String,
    /// Pings tried before a connection attempt is reported as failed.
    pub ping_attempts: u32,
}

impl MongoConfig {
    /// Parse `uri`, defaulting the database name when `db_name` is absent.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options
            .app_name
            .get_or_insert_with(|| env!("CARGO_PKG_NAME").to_owned());

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
            ping_attempts: PING_ATTEMPTS,
        })
    }

    /// Open a client on the battle database and wait until the server answers a ping.
    pub(super) async fn open(&self) -> MongoResult<(Client, Database)> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);

        let mut backoff = PING_BACKOFF;
        let mut attempts = 0;
        while let Err(source) = database.run_command(doc! { "ping": 1 }).await {
            attempts += 1;
            if attempts >= self.ping_attempts.max(1) {
                return Err(MongoDaoError::InitialPing { attempts, source });
            }
            debug!(
                attempts,
                database = %self.database_name,
                error = %source,
                "room store ping failed; retrying"
            );
            sleep(backoff).await;
            backoff = (backoff * 2).min(PING_BACKOFF_CAP);
        }

        Ok((client, database))
    }
}
