use std::sync::Arc;

#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

use crate::config::DatabaseConfig;
#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteMessageStore;
use crate::db::{DatabaseError, MemoryMessageStore, MessageStore};

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<Arc<String>>,
    message_store: Arc<dyn MessageStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        match &config.path {
            Some(path) => {
                #[cfg(feature = "sqlite")]
                {
                    let path = Arc::new(path.clone());
                    Ok(Self {
                        sqlite_path: Some(path.clone()),
                        message_store: Arc::new(SqliteMessageStore::new(path)),
                    })
                }
                #[cfg(not(feature = "sqlite"))]
                {
                    let _ = path;
                    Err(DatabaseError::Connection(
                        "SQLite feature not enabled".to_string(),
                    ))
                }
            }
            None => Ok(Self {
                #[cfg(feature = "sqlite")]
                sqlite_path: None,
                message_store: Arc::new(MemoryMessageStore::new()),
            }),
        }
    }

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        self.message_store.clone()
    }

    /// Creates the mapping table when it does not exist yet. Schema
    /// migrations proper are outside this core.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        #[cfg(feature = "sqlite")]
        if let Some(path) = &self.sqlite_path {
            let path = path.clone();
            return tokio::task::spawn_blocking(move || {
                let mut conn = SqliteConnection::establish(&path)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                diesel::sql_query(
                    r#"
                    CREATE TABLE IF NOT EXISTS message_mappings (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        instance_id BIGINT NOT NULL,
                        qq_room_id BIGINT NOT NULL,
                        qq_sender_id BIGINT NOT NULL,
                        seq BIGINT NOT NULL,
                        rand BIGINT NOT NULL,
                        tg_chat_id BIGINT NOT NULL,
                        tg_msg_id BIGINT NOT NULL,
                        brief TEXT NOT NULL,
                        time BIGINT NOT NULL,
                        created_at TEXT NOT NULL DEFAULT (datetime('now'))
                    )
                    "#,
                )
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

                diesel::sql_query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_message_mappings_qq
                    ON message_mappings (qq_room_id, seq, qq_sender_id, instance_id)
                    "#,
                )
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

                Ok(())
            })
            .await
            .map_err(|e| DatabaseError::Migration(format!("database task failed: {e}")))?;
        }
        Ok(())
    }
}
