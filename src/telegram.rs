use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::ActionLink;

pub mod gateway;

/// Attachment slot of an outgoing Telegram message.
#[derive(Debug, Clone, PartialEq)]
pub enum TelegramFileRef {
    /// Remote URL the Telegram server fetches itself.
    Url(String),
    Local(PathBuf),
    Bytes { name: String, data: Vec<u8> },
    /// Native sticker, addressed by its document handle.
    StickerHandle(String),
    /// Speculative web-page preview used for rich sender headers.
    WebPreview { url: String, small_media: bool },
    Venue {
        lat: f64,
        lng: f64,
        title: String,
        address: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPreview {
    #[default]
    Disabled,
    AboveText,
    BelowText,
}

/// Frozen outbound message; one `send_message` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    /// HTML-formatted body.
    pub text: String,
    pub files: Vec<TelegramFileRef>,
    pub action_links: Vec<ActionLink>,
    pub reply_to: Option<i64>,
    pub force_document: bool,
    pub link_preview: LinkPreview,
}

impl OutboundMessage {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn uses_web_preview(&self) -> bool {
        self.files
            .iter()
            .any(|f| matches!(f, TelegramFileRef::WebPreview { .. }))
    }

    /// Strips the web-preview attachment, for the plain-text retry path.
    pub fn without_web_preview(&self) -> Self {
        let mut copy = self.clone();
        copy.files
            .retain(|f| !matches!(f, TelegramFileRef::WebPreview { .. }));
        copy.link_preview = LinkPreview::Disabled;
        copy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub id: i64,
    /// Whether Telegram actually rendered a web preview for the message.
    pub has_web_preview: bool,
}

/// Inbound media classification from the Telegram client collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TelegramMedia {
    Photo { url: String, spoiler: bool },
    /// Image posted as a sticker or image-typed document.
    StickerImage { url: String, spoiler: bool },
    /// Lottie-animated sticker; may map to a known face id.
    AnimatedSticker { file_handle: String, url: String },
    Video {
        url: String,
        size: u64,
        mime: String,
    },
    Gif { url: String, size: u64 },
    Voice { url: String },
    Document {
        url: String,
        name: String,
        size: u64,
        mime: String,
    },
    Venue {
        lat: f64,
        lng: f64,
        title: String,
        address: String,
    },
    Geo { lat: f64, lng: f64 },
    Poll {
        question: String,
        answers: Vec<String>,
        multiple_choice: bool,
    },
    Contact {
        first_name: String,
        last_name: Option<String>,
        phone: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmojiEntity {
    pub offset: usize,
    pub length: usize,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOrigin {
    pub name: String,
    /// The forwarded message originally came from the bridge bot itself.
    pub from_bridge_bot: bool,
}

/// Inbound message event from the Telegram side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramInbound {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    /// Channel/chat color seed used for the emoji prefix.
    pub sender_color: i64,
    pub is_channel_post: bool,
    pub text: String,
    pub media: Option<TelegramMedia>,
    pub custom_emojis: Vec<CustomEmojiEntity>,
    pub forward_origin: Option<ForwardOrigin>,
    pub reply_to_id: Option<i64>,
    pub quote_text: Option<String>,
}

/// Narrow client surface toward Telegram; transport and session handling are
/// the collaborator's problem.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    fn bot_username(&self) -> &str;

    async fn send_message(&self, chat_id: i64, message: &OutboundMessage) -> Result<SentMessage>;

    async fn edit_message(&self, chat_id: i64, message_id: i64, new_text: &str) -> Result<()>;

    /// Re-fetches a sent message; `None` when it no longer exists.
    async fn fetch_message(&self, chat_id: i64, message_id: i64)
    -> Result<Option<FetchedMessage>>;

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    /// Resolves a custom emoji document to a downloadable URL.
    async fn fetch_custom_emoji(&self, document_id: &str) -> Result<String>;
}
