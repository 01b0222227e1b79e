use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use crate::bridge::ForwardPair;
use crate::bridge::header::{HeaderDelivery, HeaderPlan, HeaderStrategy};
use crate::bridge::translate::{TgTranslation, VideoMeta};
use crate::content::{ActionLink, ContentElement, DeliveryBuffer, partition_chainable};
use crate::db::models::NewMessageMapping;
use crate::db::stores::MessageStore;
use crate::flags;
use crate::media::{MediaPipeline, TempScope};
use crate::qq::{QqClient, QqMessageEvent, QqMessageSent, QqQuote, QqSendElement};
use crate::telegram::{OutboundMessage, TelegramClient, TelegramFileRef, TelegramInbound};

/// Sends composed buffers toward Telegram and records the mapping row for
/// every delivered message.
pub struct TelegramDispatcher {
    tg: Arc<dyn TelegramClient>,
    media: Arc<MediaPipeline>,
    store: Arc<dyn MessageStore>,
    header: HeaderStrategy,
    instance_id: i64,
}

impl TelegramDispatcher {
    pub fn new(
        tg: Arc<dyn TelegramClient>,
        media: Arc<MediaPipeline>,
        store: Arc<dyn MessageStore>,
        instance_id: i64,
    ) -> Self {
        let header = HeaderStrategy::new(Arc::clone(&tg));
        Self {
            tg,
            media,
            store,
            header,
            instance_id,
        }
    }

    pub async fn dispatch(
        &self,
        pair: &ForwardPair,
        event: &QqMessageEvent,
        mut buffer: DeliveryBuffer,
        mut plan: HeaderPlan,
        brief: &str,
        scope: &mut TempScope,
    ) -> Result<HeaderDelivery> {
        let mut files = Vec::new();
        let mut force_document = buffer.force_document;
        for attachment in &buffer.attachments {
            match attachment {
                ContentElement::Sticker { handle } => {
                    files.push(TelegramFileRef::StickerHandle(handle.clone()));
                }
                ContentElement::Image {
                    source, as_sticker, ..
                } => match source {
                    crate::content::MediaSource::Remote(url) => {
                        let prepared = self.media.prepare_image(url, *as_sticker).await;
                        force_document |= prepared.force_document;
                        files.push(prepared.file);
                    }
                    crate::content::MediaSource::Local(path) => {
                        files.push(TelegramFileRef::Local(path.clone()));
                    }
                    crate::content::MediaSource::Bytes(data) => {
                        files.push(TelegramFileRef::Bytes {
                            name: "image".to_string(),
                            data: data.clone(),
                        });
                    }
                },
                ContentElement::Video { source } => match source {
                    crate::content::MediaSource::Remote(url) => {
                        let prepared = self.media.prepare_file(url, "video.mp4").await;
                        files.push(prepared.file);
                    }
                    crate::content::MediaSource::Local(path) => {
                        files.push(TelegramFileRef::Local(path.clone()));
                    }
                    crate::content::MediaSource::Bytes(data) => {
                        files.push(TelegramFileRef::Bytes {
                            name: "video.mp4".to_string(),
                            data: data.clone(),
                        });
                    }
                },
                ContentElement::Voice { source } => {
                    match self
                        .media
                        .prepare_voice_for_telegram(source.remote_url(), scope)
                        .await
                    {
                        Ok(Some(file)) => files.push(file),
                        Ok(None) => buffer.body.push_str("<i>[语音]</i>"),
                        Err(e) => {
                            warn!("voice preparation failed: {}", e);
                            buffer.body.push_str("<i>[语音]</i>");
                        }
                    }
                }
                ContentElement::File { name, source, .. } => match source {
                    crate::content::MediaSource::Remote(url) => {
                        let prepared = self.media.prepare_file(url, name).await;
                        force_document |= prepared.force_document;
                        files.push(prepared.file);
                    }
                    crate::content::MediaSource::Local(path) => {
                        files.push(TelegramFileRef::Local(path.clone()));
                    }
                    crate::content::MediaSource::Bytes(data) => {
                        files.push(TelegramFileRef::Bytes {
                            name: name.clone(),
                            data: data.clone(),
                        });
                    }
                },
                ContentElement::Location {
                    lat,
                    lng,
                    title,
                    address,
                } => {
                    let title = if title.is_empty() {
                        plan.sender_label.trim_end_matches(':').to_string()
                    } else {
                        title.clone()
                    };
                    files.push(TelegramFileRef::Venue {
                        lat: *lat,
                        lng: *lng,
                        title,
                        address: address.clone(),
                    });
                }
                other => warn!(?other, "unexpected attachment element, skipping"),
            }
        }

        let mut action_links = buffer.action_links.clone();
        if buffer.wants_sender_label && !plan.is_empty() {
            let label = match &plan.rich_url {
                Some(url) => ActionLink::url(plan.sender_label.clone(), url.clone()),
                None => ActionLink::inline(plan.sender_label.clone()),
            };
            action_links.insert(0, label);
            plan = HeaderPlan::none();
        }
        if buffer.suppress_header {
            plan = HeaderPlan::none();
        }

        let message = OutboundMessage {
            text: buffer.body.clone(),
            files,
            action_links,
            reply_to: buffer.reply_target_id,
            force_document,
            ..Default::default()
        };

        let delivery = self
            .header
            .deliver(
                pair.tg_chat_id,
                message,
                &plan,
                buffer.contains_mention_link,
            )
            .await
            .context("telegram delivery failed")?;

        self.record_mapping(pair, event, delivery.sent.id, brief)
            .await;
        Ok(delivery)
    }

    async fn record_mapping(
        &self,
        pair: &ForwardPair,
        event: &QqMessageEvent,
        tg_msg_id: i64,
        brief: &str,
    ) {
        let mapping = NewMessageMapping {
            instance_id: self.instance_id,
            qq_room_id: pair.qq_room.id,
            qq_sender_id: event.sender.id,
            seq: event.seq,
            rand: event.rand,
            tg_chat_id: pair.tg_chat_id,
            tg_msg_id,
            brief: brief.to_string(),
            time: event.time,
        };
        if let Err(e) = self.store.insert(&mapping).await {
            warn!("message mapping insert failed: {}", e);
        }
    }
}

fn provenance_payload(sender_id: i64, no_split_sender: bool, skip: bool) -> String {
    let mut payload = json!({
        "id": sender_id,
        "eqq": {
            "type": "tg",
            "tgUid": sender_id,
            "noSplitSender": no_split_sender,
            "version": 2,
        },
    });
    if skip {
        payload["q2tgSkip"] = json!(true);
    }
    payload.to_string()
}

/// Sends translated Telegram messages toward QQ, trying the identity-mapped
/// relay first, and records mapping rows.
pub struct QqDispatcher {
    qq: Arc<dyn QqClient>,
    media: Arc<MediaPipeline>,
    store: Arc<dyn MessageStore>,
    instance_id: i64,
}

impl QqDispatcher {
    pub fn new(
        qq: Arc<dyn QqClient>,
        media: Arc<MediaPipeline>,
        store: Arc<dyn MessageStore>,
        instance_id: i64,
    ) -> Self {
        Self {
            qq,
            media,
            store,
            instance_id,
        }
    }

    pub async fn dispatch(
        &self,
        pair: &ForwardPair,
        inbound: &TelegramInbound,
        translation: TgTranslation,
        quote: Option<QqQuote>,
        effective_flags: u32,
        personal_mode: bool,
        scope: &mut TempScope,
    ) -> Result<Vec<QqMessageSent>> {
        let TgTranslation {
            elements,
            brief,
            header,
            spoiler,
            video_meta,
        } = translation;
        let (chainable, standalone) = partition_chainable(elements);

        // Relayed-identity fast path: the whole chain goes out as the mapped
        // QQ account, tagged so the mirror never loops back.
        if standalone.is_empty() && !chainable.is_empty() {
            if let Some(mapped) = pair.mapped_identities.get(&inbound.sender_id) {
                if !flags::has(effective_flags, flags::DISABLE_SEAMLESS) {
                    let mut elements = self
                        .materialize(&chainable, video_meta.as_ref(), scope)
                        .await;
                    elements.push(QqSendElement::Provenance {
                        payload: provenance_payload(inbound.sender_id, true, true),
                    });
                    match mapped
                        .send_elements(&pair.qq_room, &elements, quote.as_ref())
                        .await
                    {
                        Ok(sent) => {
                            self.record_mapping(pair, inbound, &sent, mapped.uin(), &brief)
                                .await;
                            return Ok(vec![sent]);
                        }
                        Err(e) => {
                            warn!("identity relay failed, falling back to header path: {}", e);
                        }
                    }
                }
            }
        }

        let mut chainable = chainable;
        if !personal_mode && !spoiler && !chainable.is_empty() {
            chainable.insert(0, ContentElement::Text(header));
        }

        let mut sent_messages = Vec::new();
        if !chainable.is_empty() {
            let mut elements = self
                .materialize(&chainable, video_meta.as_ref(), scope)
                .await;
            elements.push(QqSendElement::Provenance {
                payload: provenance_payload(inbound.sender_id, personal_mode, false),
            });
            let sent = self
                .qq
                .send_elements(&pair.qq_room, &elements, quote.as_ref())
                .await
                .context("qq delivery failed")?;
            self.record_mapping(pair, inbound, &sent, self.qq.uin(), &brief)
                .await;
            sent_messages.push(sent);
        }

        for element in &standalone {
            let elements = self
                .materialize(std::slice::from_ref(element), video_meta.as_ref(), scope)
                .await;
            if elements.is_empty() {
                continue;
            }
            let sent = self
                .qq
                .send_elements(&pair.qq_room, &elements, quote.as_ref())
                .await
                .context("qq delivery failed")?;
            self.record_mapping(pair, inbound, &sent, self.qq.uin(), &brief)
                .await;
            sent_messages.push(sent);
        }

        if !sent_messages.is_empty() {
            info!(
                chat_id = inbound.chat_id,
                room_id = pair.qq_room.id,
                count = sent_messages.len(),
                "mirrored telegram message to qq"
            );
        }
        Ok(sent_messages)
    }

    async fn materialize(
        &self,
        elements: &[ContentElement],
        video_meta: Option<&VideoMeta>,
        scope: &mut TempScope,
    ) -> Vec<QqSendElement> {
        let mut out = Vec::new();
        for element in elements {
            match element {
                ContentElement::Text(text) => out.push(QqSendElement::Text(text.clone())),
                ContentElement::Mention { resolved_name, .. } => {
                    out.push(QqSendElement::Text(resolved_name.clone()));
                }
                ContentElement::Face { id, .. } => out.push(QqSendElement::Face { id: *id }),
                ContentElement::Image { source, as_sticker, .. } => {
                    // Spoiler photos go out as plain images; QQ's view-once
                    // flash delivery needs a web surface this core lacks.
                    out.push(QqSendElement::Image {
                        source: source.clone(),
                        as_sticker: *as_sticker,
                    });
                }
                ContentElement::Sticker { handle } => {
                    match self.media.prepare_animated_sticker(handle, scope).await {
                        Ok(source) => out.push(QqSendElement::Image {
                            source,
                            as_sticker: true,
                        }),
                        Err(e) => {
                            warn!("animated sticker conversion failed: {}", e);
                            out.push(QqSendElement::Text("[贴纸]".to_string()));
                        }
                    }
                }
                ContentElement::Video { source } => {
                    let Some(url) = source.remote_url() else {
                        warn!("video without a remote source, skipping");
                        continue;
                    };
                    let meta = video_meta.cloned().unwrap_or(VideoMeta {
                        size: 0,
                        mime: "video/mp4".to_string(),
                        is_gif: false,
                    });
                    match self
                        .media
                        .prepare_video_for_qq(url, meta.size, &meta.mime, meta.is_gif, scope)
                        .await
                    {
                        Ok(element) => out.push(element),
                        Err(e) => {
                            warn!("video preparation failed: {}", e);
                            out.push(QqSendElement::Text("[视频]".to_string()));
                        }
                    }
                }
                ContentElement::Voice { source } => {
                    let Some(url) = source.remote_url() else {
                        continue;
                    };
                    match self.media.prepare_voice_for_qq(url, scope).await {
                        Ok(source) => out.push(QqSendElement::Voice { source }),
                        Err(e) => {
                            warn!("voice preparation failed: {}", e);
                            out.push(QqSendElement::Text("[语音]".to_string()));
                        }
                    }
                }
                ContentElement::Location {
                    lat,
                    lng,
                    title,
                    address,
                } => {
                    let label = if address.is_empty() {
                        title.clone()
                    } else {
                        format!("{title} ({address})")
                    };
                    out.push(QqSendElement::Location {
                        lat: *lat,
                        lng: *lng,
                        label,
                    });
                }
                other => warn!(?other, "element has no qq rendition, skipping"),
            }
        }
        out
    }

    async fn record_mapping(
        &self,
        pair: &ForwardPair,
        inbound: &TelegramInbound,
        sent: &QqMessageSent,
        sender_uin: i64,
        brief: &str,
    ) {
        let mapping = NewMessageMapping {
            instance_id: self.instance_id,
            qq_room_id: pair.qq_room.id,
            qq_sender_id: sender_uin,
            seq: sent.seq,
            rand: sent.rand,
            tg_chat_id: inbound.chat_id,
            tg_msg_id: inbound.message_id,
            brief: brief.to_string(),
            time: sent.time,
        };
        if let Err(e) = self.store.insert(&mapping).await {
            warn!("message mapping insert failed: {}", e);
        }
    }
}
