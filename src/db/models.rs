use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per delivered message, linking QQ addressing (room, seq, sender,
/// rand) to the Telegram message it became. Append-only; the reply resolver
/// is the only reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMapping {
    pub id: i64,
    pub instance_id: i64,
    pub qq_room_id: i64,
    pub qq_sender_id: i64,
    pub seq: i64,
    pub rand: i64,
    pub tg_chat_id: i64,
    pub tg_msg_id: i64,
    /// Short text shown when the message is later quoted.
    pub brief: String,
    /// Source-platform timestamp, unix seconds.
    pub time: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert shape; `id`/`created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageMapping {
    pub instance_id: i64,
    pub qq_room_id: i64,
    pub qq_sender_id: i64,
    pub seq: i64,
    pub rand: i64,
    pub tg_chat_id: i64,
    pub tg_msg_id: i64,
    pub brief: String,
    pub time: i64,
}

impl NewMessageMapping {
    pub fn into_mapping(self, id: i64) -> MessageMapping {
        MessageMapping {
            id,
            instance_id: self.instance_id,
            qq_room_id: self.qq_room_id,
            qq_sender_id: self.qq_sender_id,
            seq: self.seq,
            rand: self.rand,
            tg_chat_id: self.tg_chat_id,
            tg_msg_id: self.tg_msg_id,
            brief: self.brief,
            time: self.time,
            created_at: Utc::now(),
        }
    }
}
