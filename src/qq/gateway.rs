//! HTTP client for the QQ gateway sidecar. The gateway owns the protocol
//! session; this side only exchanges normalized JSON.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::content::MediaSource;
use crate::qq::{
    ForwardEntry, QqClient, QqMessageEvent, QqMessageSent, QqQuote, QqRoom, QqSendElement,
};

pub struct QqGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
    uin: i64,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct NameResponse {
    name: String,
}

impl QqGateway {
    pub fn new(base_url: &str, token: Option<String>, uin: i64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            uin,
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
            .with_context(|| format!("qq gateway call {method} failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "qq gateway call {method} returned {}",
                response.status()
            ));
        }
        response
            .json()
            .await
            .with_context(|| format!("qq gateway call {method} returned malformed JSON"))
    }

    /// Long-polls the gateway for buffered inbound events.
    pub async fn poll_events(&self) -> Result<Vec<QqMessageEvent>> {
        self.call("events", json!({})).await
    }

    async fn wire_source(&self, source: &MediaSource) -> Result<Value> {
        Ok(match source {
            MediaSource::Remote(url) => json!({ "url": url }),
            MediaSource::Local(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading media at {}", path.display()))?;
                json!({ "base64": BASE64.encode(data) })
            }
            MediaSource::Bytes(data) => json!({ "base64": BASE64.encode(data) }),
        })
    }

    async fn wire_element(&self, element: &QqSendElement) -> Result<Value> {
        Ok(match element {
            QqSendElement::Text(text) => json!({ "type": "text", "data": text }),
            QqSendElement::Image { source, as_sticker } => json!({
                "type": "image",
                "data": { "payload": self.wire_source(source).await?, "as_sticker": as_sticker },
            }),
            QqSendElement::Face { id } => json!({ "type": "face", "data": { "id": id } }),
            QqSendElement::Voice { source } => json!({
                "type": "voice",
                "data": { "payload": self.wire_source(source).await? },
            }),
            QqSendElement::Video { path } => {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading video at {}", path.display()))?;
                json!({ "type": "video", "data": { "base64": BASE64.encode(data) } })
            }
            QqSendElement::Location { lat, lng, label } => json!({
                "type": "location",
                "data": { "lat": lat, "lng": lng, "label": label },
            }),
            QqSendElement::Provenance { payload } => json!({
                "type": "provenance",
                "data": { "payload": payload },
            }),
        })
    }
}

#[async_trait]
impl QqClient for QqGateway {
    fn uin(&self) -> i64 {
        self.uin
    }

    async fn resolve_member(&self, room_id: i64, user_id: i64) -> Result<String> {
        let response: NameResponse = self
            .call("member", json!({ "room_id": room_id, "user_id": user_id }))
            .await?;
        Ok(response.name)
    }

    async fn fetch_file_url(&self, room_id: i64, file_id: &str) -> Result<String> {
        let response: UrlResponse = self
            .call("fileUrl", json!({ "room_id": room_id, "file_id": file_id }))
            .await?;
        Ok(response.url)
    }

    async fn fetch_video_url(&self, room_id: i64, file_id: &str) -> Result<String> {
        let response: UrlResponse = self
            .call("videoUrl", json!({ "room_id": room_id, "file_id": file_id }))
            .await?;
        Ok(response.url)
    }

    async fn fetch_voice_url(&self, room_id: i64, message_id: &str) -> Result<String> {
        let response: UrlResponse = self
            .call(
                "voiceUrl",
                json!({ "room_id": room_id, "message_id": message_id }),
            )
            .await?;
        Ok(response.url)
    }

    async fn fetch_forward_bundle(
        &self,
        res_id: &str,
        file_name: Option<&str>,
    ) -> Result<Vec<ForwardEntry>> {
        self.call(
            "forwardBundle",
            json!({ "res_id": res_id, "file_name": file_name }),
        )
        .await
    }

    async fn send_elements(
        &self,
        room: &QqRoom,
        elements: &[QqSendElement],
        quote: Option<&QqQuote>,
    ) -> Result<QqMessageSent> {
        let mut wire = Vec::with_capacity(elements.len());
        for element in elements {
            wire.push(self.wire_element(element).await?);
        }
        self.call(
            "send",
            json!({ "room": room, "elements": wire, "quote": quote }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remote_sources_stay_urls_on_the_wire() {
        let gateway = QqGateway::new("http://127.0.0.1:6700/", None, 1000);
        let wire = gateway
            .wire_source(&MediaSource::Remote("https://example.org/a.png".to_string()))
            .await
            .unwrap();
        assert_eq!(wire["url"], "https://example.org/a.png");
    }

    #[tokio::test]
    async fn byte_sources_are_base64_encoded() {
        let gateway = QqGateway::new("http://127.0.0.1:6700", None, 1000);
        let wire = gateway
            .wire_source(&MediaSource::Bytes(vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(wire["base64"], BASE64.encode([1u8, 2, 3]));
    }

    #[test]
    fn base_url_loses_its_trailing_slash() {
        let gateway = QqGateway::new("http://127.0.0.1:6700/", None, 1000);
        assert_eq!(gateway.base_url, "http://127.0.0.1:6700");
    }
}
