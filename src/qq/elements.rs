use serde::{Deserialize, Serialize};

use crate::content::MentionTarget;

/// One rich-content element as received from the QQ client collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QqElement {
    Text(String),
    Markdown(String),
    At {
        target: MentionTarget,
        /// Display text, when the client already resolved one.
        text: Option<String>,
    },
    /// Built-in face; `text` is the caption the client may attach.
    Face { id: i32, text: Option<String> },
    /// "Super face" variant, same rendering path as `Face`.
    Sface { id: i32, text: Option<String> },
    /// Big-face sticker addressed by file hash.
    Bface { file: String, text: Option<String> },
    Image {
        file: String,
        url: String,
        /// Sticker-like image ("asface").
        as_sticker: bool,
    },
    /// View-once image.
    Flash { file: String, url: String },
    Video { file_id: String, url: Option<String> },
    Voice { url: Option<String> },
    File {
        file_id: String,
        name: String,
        size: u64,
    },
    Share { url: String },
    /// Mini-program / structured JSON card, raw payload.
    Json(String),
    /// Legacy XML card, raw payload.
    Xml(String),
    Dice { value: i32 },
    Rps { value: i32 },
    Poke { text: String },
    /// Forwarded-bundle marker; per platform semantics the message carries
    /// nothing else.
    Forward {
        res_id: String,
        file_name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QqSender {
    pub id: i64,
    pub name: String,
    /// Anonymous alias shown in place of the member name, when present.
    pub anonymous_alias: Option<String>,
}

/// Reference to the message this one replies to, as QQ addresses messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub seq: i64,
    pub sender_id: i64,
    pub rand: i64,
    pub time: i64,
}

/// Inbound message event from the QQ side. Constructed per received event,
/// consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QqMessageEvent {
    pub sender: QqSender,
    pub room_id: i64,
    pub elements: Vec<QqElement>,
    pub message_id: String,
    pub seq: i64,
    pub rand: i64,
    pub time: i64,
    pub reply_to: Option<ReplyRef>,
    pub mentions_me: bool,
    pub mentions_everyone: bool,
}

/// Entry of a fetched forward bundle, enough for a brief preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardEntry {
    pub nickname: String,
    pub text: String,
}

/// Element in a message sent toward QQ.
#[derive(Debug, Clone, PartialEq)]
pub enum QqSendElement {
    Text(String),
    Image {
        source: crate::content::MediaSource,
        as_sticker: bool,
    },
    Face { id: i32 },
    Voice { source: crate::content::MediaSource },
    Video { path: std::path::PathBuf },
    Location {
        lat: f64,
        lng: f64,
        label: String,
    },
    /// Non-visible provenance marker carried on relayed messages so the
    /// bridge never mirrors them back.
    Provenance { payload: String },
}

impl QqSendElement {
    pub fn is_provenance(&self) -> bool {
        matches!(self, QqSendElement::Provenance { .. })
    }
}
