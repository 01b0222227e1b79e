use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::telegram::{
    LinkPreview, OutboundMessage, SentMessage, TelegramClient, TelegramFileRef,
};
use crate::utils::formatting::{contains_url, first_url, html_escape};

const PREVIEW_VERIFY_DELAY: Duration = Duration::from_secs(3);

const COLOR_EMOJIS: [&str; 9] = ["🔴", "🟠", "🟡", "🟢", "🔵", "🟣", "⚫️", "⚪️", "🟤"];
const TG_COLOR_EMOJIS: [&str; 7] = ["❤️", "🧡", "💜", "💚", "🩵", "💙", "🩷"];

/// Stable per-user color dot for message headers.
pub fn color_emoji(index: i64) -> &'static str {
    COLOR_EMOJIS[index.rem_euclid(COLOR_EMOJIS.len() as i64) as usize]
}

/// Telegram-palette variant, seeded by the sender's peer color or id.
pub fn tg_color_emoji(index: i64) -> &'static str {
    let mut index = index;
    if index < 0 {
        let s = index.to_string();
        index = match s.strip_prefix("-100") {
            Some(rest) if !rest.is_empty() => rest.parse().unwrap_or(-index),
            _ => -index,
        };
    }
    TG_COLOR_EMOJIS[index.rem_euclid(TG_COLOR_EMOJIS.len() as i64) as usize]
}

/// Profile-card URL the web preview renders as the rich header. The header
/// hash busts the preview cache when the member's card name changes.
pub fn rich_header_url(endpoint: &str, api_key: &str, user_id: i64, header: &str) -> String {
    let mut url = format!("{endpoint}/richHeader/{api_key}/{user_id}");
    let mut sep = '?';
    if !header.is_empty() {
        let digest = md5::compute(header.as_bytes());
        url.push_str(&format!("{sep}hash={:.10}", format!("{digest:x}")));
        sep = '&';
    }
    url.push_str(&format!(
        "{sep}date={}",
        chrono::Local::now().format("%Y-%m-%d")
    ));
    url
}

/// Precomputed header renditions for one outgoing message.
#[derive(Debug, Clone, Default)]
pub struct HeaderPlan {
    /// `<b>name</b>: ` with an optional color prefix; empty in DMs.
    pub plain: String,
    /// Same header with the name wrapped in a rich-header link. Falls back
    /// to the plain form when the rich header is unavailable.
    pub linked: String,
    pub rich_url: Option<String>,
    /// Short `name:` label for sticker and media sends that bypass headers.
    pub sender_label: String,
}

impl HeaderPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty()
    }

    fn join(header: &str, body: &str) -> String {
        if header.is_empty() || body.is_empty() {
            format!("{header}{body}")
        } else {
            format!("{header}\n{body}")
        }
    }

    pub fn with_linked(&self, body: &str) -> String {
        Self::join(&self.linked, body)
    }

    pub fn with_plain(&self, body: &str) -> String {
        Self::join(&self.plain, body)
    }
}

/// Builds the header renditions for a group message from QQ.
pub fn plan_qq_header(
    sender_display: &str,
    sender_id: i64,
    is_dm: bool,
    color_prefix: bool,
    rich_enabled: bool,
    web_endpoint: Option<&str>,
    api_key: &str,
) -> HeaderPlan {
    if is_dm {
        return HeaderPlan::none();
    }
    let prefix = if color_prefix {
        color_emoji(sender_id).to_string()
    } else {
        String::new()
    };
    let plain = format!("{prefix}<b>{}</b>: ", html_escape(sender_display));
    let rich_url = match (rich_enabled, web_endpoint) {
        (true, Some(endpoint)) => Some(rich_header_url(endpoint, api_key, sender_id, &plain)),
        _ => None,
    };
    let linked = match &rich_url {
        Some(url) => format!(
            "{prefix}<b><a href=\"{url}\">{}</a></b>: ",
            html_escape(sender_display)
        ),
        None => plain.clone(),
    };
    HeaderPlan {
        plain,
        linked,
        rich_url,
        sender_label: format!("{sender_display}:"),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeaderDelivery {
    pub sent: SentMessage,
    pub rich_header_used: bool,
}

/// Decides between the speculative web-preview header and the inline bold
/// header, sends, and verifies the preview actually rendered.
pub struct HeaderStrategy {
    tg: Arc<dyn TelegramClient>,
}

impl HeaderStrategy {
    pub fn new(tg: Arc<dyn TelegramClient>) -> Self {
        Self { tg }
    }

    /// Sends `message` (its `text` holding the header-less body) applying
    /// `plan`. `contains_mention_link` marks bodies whose URLs are mention
    /// links rather than content needing its own preview.
    pub async fn deliver(
        &self,
        chat_id: i64,
        mut message: OutboundMessage,
        plan: &HeaderPlan,
        contains_mention_link: bool,
    ) -> Result<HeaderDelivery> {
        let body = message.text.clone();
        let mut rich_header_used = false;

        if message.files.is_empty()
            && plan.rich_url.is_some()
            && (contains_mention_link || !contains_url(&body))
        {
            rich_header_used = true;
            message.files.push(TelegramFileRef::WebPreview {
                url: plan.rich_url.clone().unwrap_or_default(),
                small_media: true,
            });
            message.link_preview = LinkPreview::AboveText;
        } else {
            // A plain content URL still gets its own preview, below the text
            // so it does not displace the header.
            if message.files.is_empty() && !contains_mention_link {
                if let Some(url) = first_url(&body) {
                    message.files.push(TelegramFileRef::WebPreview {
                        url: url.to_string(),
                        small_media: true,
                    });
                    message.link_preview = LinkPreview::BelowText;
                }
            }
            message.text = plan.with_linked(&body);
        }

        let sent = match self.tg.send_message(chat_id, &message).await {
            Ok(sent) => sent,
            Err(e) if rich_header_used => {
                // Usually a malformed profile URL; retry once without it.
                warn!("rich header send failed, retrying plain: {}", e);
                rich_header_used = false;
                let mut retry = message.without_web_preview();
                retry.text = plan.with_plain(&body);
                self.tg.send_message(chat_id, &retry).await?
            }
            Err(e) if message.uses_web_preview() => {
                warn!("web preview send failed, retrying without: {}", e);
                let retry = message.without_web_preview();
                self.tg.send_message(chat_id, &retry).await?
            }
            Err(e) => return Err(e),
        };

        if rich_header_used {
            self.spawn_preview_verification(chat_id, sent.id, plan.with_linked(&body));
        }

        Ok(HeaderDelivery {
            sent,
            rich_header_used,
        })
    }

    /// Re-fetches the message after a short delay and edits the header in
    /// when Telegram did not render the preview. The task keeps running even
    /// if the message is deleted in the meantime; the edit then just fails.
    fn spawn_preview_verification(&self, chat_id: i64, message_id: i64, fallback_text: String) {
        let tg = Arc::clone(&self.tg);
        tokio::spawn(async move {
            tokio::time::sleep(PREVIEW_VERIFY_DELAY).await;
            match tg.fetch_message(chat_id, message_id).await {
                Ok(Some(fetched)) if fetched.has_web_preview => {}
                Ok(_) => {
                    warn!(
                        chat_id,
                        message_id, "rich header preview did not render, editing header in"
                    );
                    if let Err(e) = tg.edit_message(chat_id, message_id, &fallback_text).await {
                        warn!("header fallback edit failed: {}", e);
                    }
                }
                Err(e) => warn!("rich header verification fetch failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::telegram::FetchedMessage;

    struct PreviewRejectingTg {
        sends: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl TelegramClient for PreviewRejectingTg {
        fn bot_username(&self) -> &str {
            "bridge_bot"
        }

        async fn send_message(
            &self,
            _chat_id: i64,
            message: &OutboundMessage,
        ) -> Result<SentMessage> {
            if message.uses_web_preview() {
                return Err(anyhow!("ENTITY_BOUNDS_INVALID"));
            }
            self.sends.lock().push(message.clone());
            Ok(SentMessage {
                id: 900,
                timestamp: 1_700_000_000,
            })
        }

        async fn edit_message(&self, _chat_id: i64, _message_id: i64, _new_text: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_message(
            &self,
            _chat_id: i64,
            _message_id: i64,
        ) -> Result<Option<FetchedMessage>> {
            Ok(None)
        }

        async fn pin_message(&self, _chat_id: i64, _message_id: i64) -> Result<()> {
            Ok(())
        }

        async fn fetch_custom_emoji(&self, _document_id: &str) -> Result<String> {
            Err(anyhow!("not used"))
        }
    }

    struct PreviewlessTg {
        sends: Mutex<Vec<OutboundMessage>>,
        edits: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl TelegramClient for PreviewlessTg {
        fn bot_username(&self) -> &str {
            "bridge_bot"
        }

        async fn send_message(
            &self,
            _chat_id: i64,
            message: &OutboundMessage,
        ) -> Result<SentMessage> {
            self.sends.lock().push(message.clone());
            Ok(SentMessage {
                id: 901,
                timestamp: 1_700_000_000,
            })
        }

        async fn edit_message(&self, _chat_id: i64, message_id: i64, new_text: &str) -> Result<()> {
            self.edits.lock().push((message_id, new_text.to_string()));
            Ok(())
        }

        async fn fetch_message(
            &self,
            _chat_id: i64,
            message_id: i64,
        ) -> Result<Option<FetchedMessage>> {
            Ok(Some(FetchedMessage {
                id: message_id,
                has_web_preview: false,
            }))
        }

        async fn pin_message(&self, _chat_id: i64, _message_id: i64) -> Result<()> {
            Ok(())
        }

        async fn fetch_custom_emoji(&self, _document_id: &str) -> Result<String> {
            Err(anyhow!("not used"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unrendered_preview_gets_the_header_edited_in() {
        let tg = Arc::new(PreviewlessTg {
            sends: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
        });
        let strategy = HeaderStrategy::new(Arc::clone(&tg) as Arc<dyn TelegramClient>);
        let plan = plan_qq_header("Alice", 7, false, false, true, Some("https://e"), "k");
        let delivery = strategy
            .deliver(555, OutboundMessage::text_only("hello"), &plan, false)
            .await
            .unwrap();
        assert!(delivery.rich_header_used);

        // The verification task wakes once the paused clock passes the delay.
        tokio::time::sleep(PREVIEW_VERIFY_DELAY + Duration::from_millis(10)).await;

        let edits = tg.edits.lock();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0], (901, plan.with_linked("hello")));
        // The original send went out headerless, carrying only the preview.
        let sends = tg.sends.lock();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].text, "hello");
        assert!(sends[0].uses_web_preview());
    }

    #[tokio::test]
    async fn failed_preview_send_retries_once_with_plain_header() {
        let tg = Arc::new(PreviewRejectingTg {
            sends: Mutex::new(Vec::new()),
        });
        let strategy = HeaderStrategy::new(Arc::clone(&tg) as Arc<dyn TelegramClient>);
        let plan = plan_qq_header("Alice", 7, false, false, true, Some("https://e"), "k");
        let delivery = strategy
            .deliver(555, OutboundMessage::text_only("hello"), &plan, false)
            .await
            .unwrap();

        assert!(!delivery.rich_header_used);
        assert_eq!(delivery.sent.id, 900);
        let sends = tg.sends.lock();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].text, plan.with_plain("hello"));
        assert!(!sends[0].uses_web_preview());
    }

    #[test]
    fn color_emoji_is_stable_per_sender() {
        assert_eq!(color_emoji(9), COLOR_EMOJIS[0]);
        assert_eq!(color_emoji(-1), color_emoji(-1));
    }

    #[test]
    fn tg_color_strips_supergroup_prefix() {
        assert_eq!(tg_color_emoji(-1001234), tg_color_emoji(1234));
    }

    #[test]
    fn rich_url_carries_hash_and_date() {
        let url = rich_header_url("https://bridge.example.org", "key1", 10086, "<b>n</b>: ");
        assert!(url.starts_with("https://bridge.example.org/richHeader/key1/10086?hash="));
        assert!(url.contains("&date="));
    }

    #[test]
    fn rich_url_without_header_skips_hash() {
        let url = rich_header_url("https://bridge.example.org", "key1", 10086, "");
        assert!(url.contains("?date="));
        assert!(!url.contains("hash="));
    }

    #[test]
    fn dm_messages_get_no_header() {
        let plan = plan_qq_header("Alice", 1, true, false, true, Some("https://e"), "k");
        assert!(plan.is_empty());
        assert_eq!(plan.with_linked("body"), "body");
    }

    #[test]
    fn disabled_rich_header_collapses_linked_to_plain() {
        let plan = plan_qq_header("Alice", 1, false, false, false, Some("https://e"), "k");
        assert_eq!(plan.linked, plan.plain);
        assert!(plan.rich_url.is_none());
    }

    #[test]
    fn header_joins_with_newline_only_when_body_present() {
        let plan = plan_qq_header("A&B", 1, false, false, false, None, "k");
        assert_eq!(plan.with_plain(""), "<b>A&amp;B</b>: ");
        assert_eq!(plan.with_plain("hi"), "<b>A&amp;B</b>: \nhi");
    }
}
