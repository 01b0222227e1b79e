use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::DatabaseError;
use super::models::{MessageMapping, NewMessageMapping};

/// Narrow persistence contract of the core: lookups in both directions and
/// appends. No updates, no deletes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_by_qq(
        &self,
        qq_room_id: i64,
        seq: i64,
        qq_sender_id: i64,
        instance_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError>;

    async fn find_by_telegram(
        &self,
        tg_chat_id: i64,
        tg_msg_id: i64,
        instance_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError>;

    async fn insert(&self, mapping: &NewMessageMapping) -> Result<i64, DatabaseError>;
}

/// In-memory store used by unit tests and ephemeral setups.
#[derive(Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<MessageMapping>>,
    next_id: AtomicI64,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_by_qq(
        &self,
        qq_room_id: i64,
        seq: i64,
        qq_sender_id: i64,
        instance_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|m| {
                m.qq_room_id == qq_room_id
                    && m.seq == seq
                    && m.qq_sender_id == qq_sender_id
                    && m.instance_id == instance_id
            })
            .cloned())
    }

    async fn find_by_telegram(
        &self,
        tg_chat_id: i64,
        tg_msg_id: i64,
        instance_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|m| {
                m.tg_chat_id == tg_chat_id
                    && m.tg_msg_id == tg_msg_id
                    && m.instance_id == instance_id
            })
            .cloned())
    }

    async fn insert(&self, mapping: &NewMessageMapping) -> Result<i64, DatabaseError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().push(mapping.clone().into_mapping(id));
        Ok(id)
    }
}
