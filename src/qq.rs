use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod elements;
pub mod faces;
pub mod gateway;

pub use self::elements::{
    ForwardEntry, QqElement, QqMessageEvent, QqSendElement, QqSender, ReplyRef,
};

/// Capability-tagged chat kind; replaces runtime type inspection of the
/// underlying client entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Group,
    DirectMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QqRoom {
    pub id: i64,
    pub kind: ChatKind,
}

impl QqRoom {
    pub fn group(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Group,
        }
    }

    pub fn direct(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::DirectMessage,
        }
    }

    pub fn is_dm(&self) -> bool {
        self.kind == ChatKind::DirectMessage
    }
}

/// Quote handle in QQ's addressing scheme, handed to `send_elements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QqQuote {
    pub seq: i64,
    pub rand: i64,
    pub sender_id: i64,
    pub time: i64,
    pub text: String,
}

/// Identifiers of a message the QQ client accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QqMessageSent {
    pub message_id: String,
    pub seq: i64,
    pub rand: i64,
    pub time: i64,
}

/// Narrow client surface the core consumes. Transport, session handling and
/// protocol details live behind it.
#[async_trait]
pub trait QqClient: Send + Sync {
    /// The bridge's own QQ identity.
    fn uin(&self) -> i64;

    /// Resolves a member's display name in a room.
    async fn resolve_member(&self, room_id: i64, user_id: i64) -> Result<String>;

    async fn fetch_file_url(&self, room_id: i64, file_id: &str) -> Result<String>;

    async fn fetch_video_url(&self, room_id: i64, file_id: &str) -> Result<String>;

    /// Re-fetches a playable URL for a voice element that arrived without one.
    async fn fetch_voice_url(&self, room_id: i64, message_id: &str) -> Result<String>;

    async fn fetch_forward_bundle(
        &self,
        res_id: &str,
        file_name: Option<&str>,
    ) -> Result<Vec<ForwardEntry>>;

    async fn send_elements(
        &self,
        room: &QqRoom,
        elements: &[QqSendElement],
        quote: Option<&QqQuote>,
    ) -> Result<QqMessageSent>;
}
