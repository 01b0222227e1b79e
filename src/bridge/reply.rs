use std::sync::Arc;

use tracing::error;

use crate::db::MessageStore;
use crate::qq::{QqQuote, ReplyRef};

/// Outcome of resolving a QQ reply toward Telegram. A miss degrades to a
/// body annotation instead of failing the forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedTgReply {
    pub reply_to: Option<i64>,
    pub note: Option<&'static str>,
}

/// Looks up message mappings to connect replies across the two platforms.
pub struct ReplyResolver {
    store: Arc<dyn MessageStore>,
    instance_id: i64,
    self_uin: i64,
}

impl ReplyResolver {
    pub fn new(store: Arc<dyn MessageStore>, instance_id: i64, self_uin: i64) -> Self {
        Self {
            store,
            instance_id,
            self_uin,
        }
    }

    /// QQ reply reference to the Telegram message id it mirrors.
    pub async fn resolve_for_telegram(&self, qq_room_id: i64, reply: &ReplyRef) -> ResolvedTgReply {
        match self
            .store
            .find_by_qq(qq_room_id, reply.seq, reply.sender_id, self.instance_id)
            .await
        {
            Ok(Some(mapping)) => ResolvedTgReply {
                reply_to: Some(mapping.tg_msg_id),
                note: None,
            },
            Ok(None) => {
                error!(
                    qq_room_id,
                    seq = reply.seq,
                    sender_id = reply.sender_id,
                    instance_id = self.instance_id,
                    "reply target not found"
                );
                ResolvedTgReply {
                    reply_to: None,
                    note: Some("\n\n<i>*回复消息找不到</i>"),
                }
            }
            Err(e) => {
                error!("reply lookup failed: {}", e);
                ResolvedTgReply {
                    reply_to: None,
                    note: Some("\n\n<i>*查找回复消息失败</i>"),
                }
            }
        }
    }

    /// Telegram reply id to a QQ quote handle. Always yields a quote so the
    /// reply intent survives; a miss quotes a marker text addressed to the
    /// bridge's own account.
    pub async fn resolve_for_qq(
        &self,
        tg_chat_id: i64,
        reply_to_id: i64,
        quote_text: Option<&str>,
    ) -> QqQuote {
        match self
            .store
            .find_by_telegram(tg_chat_id, reply_to_id, self.instance_id)
            .await
        {
            Ok(Some(mapping)) => {
                let text = quote_text
                    .map(str::to_string)
                    .or_else(|| (!mapping.brief.is_empty()).then(|| mapping.brief.clone()))
                    .unwrap_or_else(|| " ".to_string());
                QqQuote {
                    seq: mapping.seq,
                    rand: mapping.rand,
                    sender_id: mapping.qq_sender_id,
                    time: mapping.time,
                    text,
                }
            }
            Ok(None) => self.placeholder_quote(quote_text.unwrap_or("回复消息找不到")),
            Err(e) => {
                error!("reply lookup failed: {}", e);
                self.placeholder_quote("查找回复消息失败")
            }
        }
    }

    fn placeholder_quote(&self, text: &str) -> QqQuote {
        QqQuote {
            seq: 1,
            rand: 1,
            sender_id: self.self_uin,
            time: chrono::Utc::now().timestamp(),
            text: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewMessageMapping;
    use crate::db::stores::MemoryMessageStore;

    fn mapping() -> NewMessageMapping {
        NewMessageMapping {
            instance_id: 0,
            qq_room_id: -100,
            qq_sender_id: 10086,
            seq: 7,
            rand: 42,
            tg_chat_id: 555,
            tg_msg_id: 901,
            brief: "hello".to_string(),
            time: 1_700_000_000,
        }
    }

    fn resolver(store: Arc<MemoryMessageStore>) -> ReplyResolver {
        ReplyResolver::new(store, 0, 111)
    }

    #[tokio::test]
    async fn qq_reply_resolves_to_telegram_id() {
        let store = Arc::new(MemoryMessageStore::new());
        store.insert(&mapping()).await.unwrap();
        let resolver = resolver(store);
        let resolved = resolver
            .resolve_for_telegram(
                -100,
                &ReplyRef {
                    seq: 7,
                    sender_id: 10086,
                    rand: 42,
                    time: 0,
                },
            )
            .await;
        assert_eq!(resolved.reply_to, Some(901));
        assert!(resolved.note.is_none());
    }

    #[tokio::test]
    async fn resolution_is_repeatable() {
        let store = Arc::new(MemoryMessageStore::new());
        store.insert(&mapping()).await.unwrap();
        let resolver = resolver(store);
        let reply = ReplyRef {
            seq: 7,
            sender_id: 10086,
            rand: 42,
            time: 0,
        };
        let first = resolver.resolve_for_telegram(-100, &reply).await;
        let second = resolver.resolve_for_telegram(-100, &reply).await;
        assert_eq!(first, second);
        assert_eq!(first.reply_to, Some(901));
    }

    #[tokio::test]
    async fn missing_qq_reply_degrades_to_note() {
        let resolver = resolver(Arc::new(MemoryMessageStore::new()));
        let resolved = resolver
            .resolve_for_telegram(
                -100,
                &ReplyRef {
                    seq: 8,
                    sender_id: 1,
                    rand: 0,
                    time: 0,
                },
            )
            .await;
        assert_eq!(resolved.reply_to, None);
        assert!(resolved.note.unwrap().contains("回复消息找不到"));
    }

    #[tokio::test]
    async fn telegram_reply_resolves_to_quote_with_brief() {
        let store = Arc::new(MemoryMessageStore::new());
        store.insert(&mapping()).await.unwrap();
        let resolver = resolver(store);
        let quote = resolver.resolve_for_qq(555, 901, None).await;
        assert_eq!(quote.seq, 7);
        assert_eq!(quote.sender_id, 10086);
        assert_eq!(quote.text, "hello");
    }

    #[tokio::test]
    async fn quote_text_overrides_stored_brief() {
        let store = Arc::new(MemoryMessageStore::new());
        store.insert(&mapping()).await.unwrap();
        let resolver = resolver(store);
        let quote = resolver.resolve_for_qq(555, 901, Some("quoted part")).await;
        assert_eq!(quote.text, "quoted part");
    }

    #[tokio::test]
    async fn missing_telegram_reply_yields_placeholder_quote() {
        let resolver = resolver(Arc::new(MemoryMessageStore::new()));
        let quote = resolver.resolve_for_qq(555, 999, None).await;
        assert_eq!(quote.seq, 1);
        assert_eq!(quote.sender_id, 111);
        assert_eq!(quote.text, "回复消息找不到");
    }
}
