use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DatabaseError;
use super::models::{MessageMapping, NewMessageMapping};
use crate::db::schema_sqlite::message_mappings;

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = message_mappings)]
struct DbMessageMapping {
    id: i64,
    instance_id: i64,
    qq_room_id: i64,
    qq_sender_id: i64,
    seq: i64,
    rand: i64,
    tg_chat_id: i64,
    tg_msg_id: i64,
    brief: String,
    time: i64,
    created_at: String,
}

impl DbMessageMapping {
    fn to_mapping(&self) -> Result<MessageMapping, DatabaseError> {
        Ok(MessageMapping {
            id: self.id,
            instance_id: self.instance_id,
            qq_room_id: self.qq_room_id,
            qq_sender_id: self.qq_sender_id,
            seq: self.seq,
            rand: self.rand,
            tg_chat_id: self.tg_chat_id,
            tg_msg_id: self.tg_msg_id,
            brief: self.brief.clone(),
            time: self.time,
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = message_mappings)]
struct DbNewMessageMapping<'a> {
    instance_id: i64,
    qq_room_id: i64,
    qq_sender_id: i64,
    seq: i64,
    rand: i64,
    tg_chat_id: i64,
    tg_msg_id: i64,
    brief: &'a str,
    time: i64,
    created_at: String,
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

pub struct SqliteMessageStore {
    db_path: Arc<String>,
}

impl SqliteMessageStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::MessageStore for SqliteMessageStore {
    async fn find_by_qq(
        &self,
        room_id: i64,
        msg_seq: i64,
        sender_id: i64,
        inst_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            message_mappings
                .filter(qq_room_id.eq(room_id))
                .filter(seq.eq(msg_seq))
                .filter(qq_sender_id.eq(sender_id))
                .filter(instance_id.eq(inst_id))
                .select(DbMessageMapping::as_select())
                .first::<DbMessageMapping>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_mapping())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn find_by_telegram(
        &self,
        chat_id: i64,
        msg_id: i64,
        inst_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            message_mappings
                .filter(tg_chat_id.eq(chat_id))
                .filter(tg_msg_id.eq(msg_id))
                .filter(instance_id.eq(inst_id))
                .select(DbMessageMapping::as_select())
                .first::<DbMessageMapping>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_mapping())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn insert(&self, mapping: &NewMessageMapping) -> Result<i64, DatabaseError> {
        let mapping = mapping.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let new_row = DbNewMessageMapping {
                instance_id: mapping.instance_id,
                qq_room_id: mapping.qq_room_id,
                qq_sender_id: mapping.qq_sender_id,
                seq: mapping.seq,
                rand: mapping.rand,
                tg_chat_id: mapping.tg_chat_id,
                tg_msg_id: mapping.tg_msg_id,
                brief: &mapping.brief,
                time: mapping.time,
                created_at: Utc::now().to_rfc3339(),
            };

            diesel::insert_into(crate::db::schema_sqlite::message_mappings::table)
                .values(new_row)
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            use crate::db::schema_sqlite::message_mappings::dsl::*;
            message_mappings
                .select(diesel::dsl::max(id))
                .first::<Option<i64>>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
                .map(|v| v.unwrap_or(0))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
