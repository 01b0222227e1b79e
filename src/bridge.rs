use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::flags;
use crate::qq::{QqClient, QqMessageEvent, QqRoom};
use crate::telegram::TelegramInbound;

pub mod cards;
pub mod dispatch;
pub mod forward;
pub mod header;
pub mod reply;
pub mod stickers;
pub mod translate;

pub use self::forward::{ForwardOutcome, ForwardService};

/// How the instance relates to its operator: `Personal` mirrors into the
/// operator's own account, `Group` runs as a neutral relay bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkMode {
    #[default]
    Group,
    Personal,
}

impl WorkMode {
    pub fn is_personal(&self) -> bool {
        matches!(self, WorkMode::Personal)
    }
}

/// Instance-wide knobs every pair inherits.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub id: i64,
    pub flags: u32,
    pub work_mode: WorkMode,
    /// Operator's Telegram username, used for the mention-of-me annotation
    /// in personal mode.
    pub owner_username: Option<String>,
    pub web_endpoint: Option<String>,
    /// Mini-app that renders forwarded-bundle records, when deployed.
    pub viewer_app: Option<String>,
}

/// One bridged room pair and its per-pair state.
pub struct ForwardPair {
    pub qq_room: QqRoom,
    pub tg_chat_id: i64,
    pub flags: u32,
    /// Key the web endpoint expects in rich-header URLs for this pair.
    pub api_key: String,
    /// Telegram user id to dedicated QQ identity, for the seamless relay.
    pub mapped_identities: HashMap<i64, Arc<dyn QqClient>>,
}

impl ForwardPair {
    pub fn effective_flags(&self, instance_flags: u32) -> u32 {
        flags::merged(self.flags, instance_flags)
    }
}

/// Entry point tying pairs to the forwarding service. Inbound events land
/// here from the client collaborators.
pub struct BridgeCore {
    pairs: Vec<Arc<ForwardPair>>,
    forward: ForwardService,
}

impl BridgeCore {
    pub fn new(pairs: Vec<Arc<ForwardPair>>, forward: ForwardService) -> Self {
        Self { pairs, forward }
    }

    pub fn pair_for_qq_room(&self, room_id: i64) -> Option<Arc<ForwardPair>> {
        self.pairs
            .iter()
            .find(|p| p.qq_room.id == room_id)
            .cloned()
    }

    pub fn pair_for_tg_chat(&self, chat_id: i64) -> Option<Arc<ForwardPair>> {
        self.pairs
            .iter()
            .find(|p| p.tg_chat_id == chat_id)
            .cloned()
    }

    pub async fn handle_qq_event(&self, event: QqMessageEvent) -> ForwardOutcome {
        let Some(pair) = self.pair_for_qq_room(event.room_id) else {
            debug!(room_id = event.room_id, "no pair for qq room, ignoring");
            return ForwardOutcome::Skipped;
        };
        self.forward.forward_from_qq(&event, &pair).await
    }

    pub async fn handle_telegram_message(&self, inbound: TelegramInbound) -> ForwardOutcome {
        let Some(pair) = self.pair_for_tg_chat(inbound.chat_id) else {
            debug!(chat_id = inbound.chat_id, "no pair for telegram chat, ignoring");
            return ForwardOutcome::Skipped;
        };
        self.forward.forward_from_telegram(&inbound, &pair).await
    }
}
