//! HTTP client for the Telegram gateway sidecar, mirroring the QQ one.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};

use crate::telegram::{
    FetchedMessage, LinkPreview, OutboundMessage, SentMessage, TelegramClient, TelegramFileRef,
    TelegramInbound,
};

pub struct TelegramGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
    bot_username: String,
}

impl TelegramGateway {
    pub fn new(base_url: &str, token: Option<String>, bot_username: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            bot_username: bot_username.to_string(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let mut request = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("telegram gateway call {method} failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "telegram gateway call {method} returned {}",
                response.status()
            ));
        }
        response
            .json()
            .await
            .with_context(|| format!("telegram gateway call {method} returned malformed JSON"))
    }

    pub async fn poll_events(&self) -> Result<Vec<TelegramInbound>> {
        self.call("events", json!({})).await
    }

    async fn wire_file(&self, file: &TelegramFileRef) -> Result<Value> {
        Ok(match file {
            TelegramFileRef::Url(url) => json!({ "kind": "url", "url": url }),
            TelegramFileRef::Local(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading media at {}", path.display()))?;
                json!({
                    "kind": "bytes",
                    "name": path.file_name().and_then(|n| n.to_str()).unwrap_or("attachment"),
                    "base64": BASE64.encode(data),
                })
            }
            TelegramFileRef::Bytes { name, data } => json!({
                "kind": "bytes",
                "name": name,
                "base64": BASE64.encode(data),
            }),
            TelegramFileRef::StickerHandle(handle) => {
                json!({ "kind": "sticker", "handle": handle })
            }
            TelegramFileRef::WebPreview { url, small_media } => json!({
                "kind": "web_preview",
                "url": url,
                "small_media": small_media,
            }),
            TelegramFileRef::Venue {
                lat,
                lng,
                title,
                address,
            } => json!({
                "kind": "venue",
                "lat": lat,
                "lng": lng,
                "title": title,
                "address": address,
            }),
        })
    }

    async fn wire_message(&self, message: &OutboundMessage) -> Result<Value> {
        let mut files = Vec::with_capacity(message.files.len());
        for file in &message.files {
            files.push(self.wire_file(file).await?);
        }
        let action_links: Vec<Value> = message
            .action_links
            .iter()
            .map(|link| json!({ "label": link.label, "url": link.url }))
            .collect();
        Ok(json!({
            "text": message.text,
            "files": files,
            "action_links": action_links,
            "reply_to": message.reply_to,
            "force_document": message.force_document,
            "link_preview": link_preview_name(message.link_preview),
        }))
    }
}

fn link_preview_name(preview: LinkPreview) -> &'static str {
    match preview {
        LinkPreview::Disabled => "disabled",
        LinkPreview::AboveText => "above",
        LinkPreview::BelowText => "below",
    }
}

#[async_trait]
impl TelegramClient for TelegramGateway {
    fn bot_username(&self) -> &str {
        &self.bot_username
    }

    async fn send_message(&self, chat_id: i64, message: &OutboundMessage) -> Result<SentMessage> {
        let wire = self.wire_message(message).await?;
        self.call("send", json!({ "chat_id": chat_id, "message": wire }))
            .await
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, new_text: &str) -> Result<()> {
        let _: Value = self
            .call(
                "edit",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": new_text }),
            )
            .await?;
        Ok(())
    }

    async fn fetch_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<FetchedMessage>> {
        self.call(
            "message",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: Value = self
            .call(
                "pin",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    async fn fetch_custom_emoji(&self, document_id: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct UrlResponse {
            url: String,
        }
        let response: UrlResponse = self
            .call("customEmoji", json!({ "document_id": document_id }))
            .await?;
        Ok(response.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ActionLink;

    #[tokio::test]
    async fn outbound_message_serializes_all_fields() {
        let gateway = TelegramGateway::new("http://127.0.0.1:6701/", None, "bridge_bot");
        let mut message = OutboundMessage::text_only("hello");
        message.reply_to = Some(42);
        message.link_preview = LinkPreview::AboveText;
        message.files.push(TelegramFileRef::WebPreview {
            url: "https://web.example.org/richHeader/k/1".to_string(),
            small_media: true,
        });
        message
            .action_links
            .push(ActionLink::url("查看", "https://example.org"));

        let wire = gateway.wire_message(&message).await.unwrap();
        assert_eq!(wire["text"], "hello");
        assert_eq!(wire["reply_to"], 42);
        assert_eq!(wire["link_preview"], "above");
        assert_eq!(wire["files"][0]["kind"], "web_preview");
        assert_eq!(wire["action_links"][0]["label"], "查看");
    }

    #[tokio::test]
    async fn in_memory_bytes_become_base64() {
        let gateway = TelegramGateway::new("http://127.0.0.1:6701", None, "bridge_bot");
        let wire = gateway
            .wire_file(&TelegramFileRef::Bytes {
                name: "a.png".to_string(),
                data: vec![9, 8, 7],
            })
            .await
            .unwrap();
        assert_eq!(wire["kind"], "bytes");
        assert_eq!(wire["name"], "a.png");
        assert_eq!(wire["base64"], BASE64.encode([9u8, 8, 7]));
    }
}
